//! Lebenszyklus- und Integrations-Tests mit Attrappen der Boundary-Traits

mod attrappen;
