//! Lautstaerke-Faehigkeit fuer abspielbare Ressourcen
//!
//! Eine Ressource kann einen [`VolumeControl`] mitbringen. Der Regler fuehrt
//! eine Lautstaerke in linearer Amplitude und rechnet die Dezibel- und
//! Logarithmus-Sichten daraus um. Glaettung (sanfte Uebergaenge statt
//! Spruengen) ist optional – Regler ohne Glaettung melden das ueber
//! `glaettung_unterstuetzt`.

use parking_lot::Mutex;

/// Exponent der logarithmischen Lautstaerke-Sicht
///
/// `logarithmisch = linear^(1/1.660964)` – der Kehrwert beim Setzen.
const LOG_EXPONENT: f64 = 1.660964;

// ---------------------------------------------------------------------------
// VolumeControl
// ---------------------------------------------------------------------------

/// Lautstaerke-Regler einer Ressource
///
/// Alle Setter nehmen den Wert in ihrer jeweiligen Darstellung entgegen und
/// wirken auf dieselbe zugrundeliegende lineare Amplitude.
pub trait VolumeControl: Send + Sync {
    /// Lineare Amplitude (1.0 = unveraendert)
    fn lautstaerke(&self) -> f64;

    /// Setzt die lineare Amplitude
    fn lautstaerke_setzen(&self, wert: f64);

    /// Lautstaerke in Dezibel (`20 * log10(linear)`)
    fn dezibel(&self) -> f64;

    /// Setzt die Lautstaerke in Dezibel
    fn dezibel_setzen(&self, wert: f64);

    /// Logarithmische Sicht (`linear^(1/1.660964)`)
    fn logarithmisch(&self) -> f64;

    /// Setzt die logarithmische Sicht
    fn logarithmisch_setzen(&self, wert: f64);

    /// Unterstuetzt dieser Regler Glaettung?
    fn glaettung_unterstuetzt(&self) -> bool {
        false
    }

    /// Glaettungskoeffizient (0.0 = sofortige Uebergaenge)
    fn glaettung(&self) -> f64 {
        0.0
    }

    /// Setzt den Glaettungskoeffizienten
    fn glaettung_setzen(&self, _koeffizient: f64) {}
}

// ---------------------------------------------------------------------------
// SmoothVolume
// ---------------------------------------------------------------------------

/// Glaettungsfaehiger Standard-Regler
///
/// Fuehrt Ziel- und Ist-Amplitude getrennt: Setter aendern das Ziel, die
/// Ist-Amplitude laeuft beim Anwenden auf Sample-Frames exponentiell
/// hinterher. Mit Koeffizient 0.0 springt sie sofort auf das Ziel.
pub struct SmoothVolume {
    zustand: Mutex<SmoothVolumeZustand>,
}

struct SmoothVolumeZustand {
    /// Ziel-Amplitude (was Setter schreiben und Getter lesen)
    ziel: f64,
    /// Aktuell angewandte Amplitude
    ist: f64,
    /// Glaettungskoeffizient (0.0..1.0)
    glaettung: f64,
}

impl SmoothVolume {
    /// Erstellt einen Regler mit Anfangs-Amplitude, ohne Glaettung
    pub fn new(anfang: f64) -> Self {
        let anfang = anfang.max(0.0);
        Self {
            zustand: Mutex::new(SmoothVolumeZustand {
                ziel: anfang,
                ist: anfang,
                glaettung: 0.0,
            }),
        }
    }

    /// Wendet die Lautstaerke auf einen Sample-Frame an
    ///
    /// Bei aktiver Glaettung laeuft die Ist-Amplitude pro Sample auf das
    /// Ziel zu, damit Lautstaerke- und Ressourcen-Wechsel hoerbar rampen
    /// statt zu klicken.
    pub fn anwenden(&self, samples: &mut [f32]) {
        let mut zustand = self.zustand.lock();
        if zustand.glaettung <= 0.0 {
            zustand.ist = zustand.ziel;
            let gain = zustand.ist as f32;
            for s in samples.iter_mut() {
                *s *= gain;
            }
            return;
        }

        let g = zustand.glaettung;
        for s in samples.iter_mut() {
            zustand.ist = g * zustand.ist + (1.0 - g) * zustand.ziel;
            *s *= zustand.ist as f32;
        }
    }
}

impl Default for SmoothVolume {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl VolumeControl for SmoothVolume {
    fn lautstaerke(&self) -> f64 {
        self.zustand.lock().ziel
    }

    fn lautstaerke_setzen(&self, wert: f64) {
        self.zustand.lock().ziel = wert.max(0.0);
    }

    fn dezibel(&self) -> f64 {
        20.0 * self.zustand.lock().ziel.log10()
    }

    fn dezibel_setzen(&self, wert: f64) {
        self.zustand.lock().ziel = 10f64.powf(wert / 20.0);
    }

    fn logarithmisch(&self) -> f64 {
        self.zustand.lock().ziel.powf(1.0 / LOG_EXPONENT)
    }

    fn logarithmisch_setzen(&self, wert: f64) {
        self.zustand.lock().ziel = wert.max(0.0).powf(LOG_EXPONENT);
    }

    fn glaettung_unterstuetzt(&self) -> bool {
        true
    }

    fn glaettung(&self) -> f64 {
        self.zustand.lock().glaettung
    }

    fn glaettung_setzen(&self, koeffizient: f64) {
        self.zustand.lock().glaettung = koeffizient.clamp(0.0, 1.0);
    }
}
