//! Per-signal state and edge detection.

use serde::{Deserialize, Serialize};

/// Which transition of a binary input counts as a trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    /// Normally open contact: a rising edge (false -> true) triggers.
    #[default]
    #[serde(rename = "no", alias = "NO", alias = "normally_open")]
    NormallyOpen,
    /// Normally closed contact: a falling edge (true -> false) triggers.
    #[serde(rename = "nc", alias = "NC", alias = "normally_closed")]
    NormallyClosed,
}

/// Direction of a transition between two consecutive samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// false -> true
    Rising,
    /// true -> false
    Falling,
}

impl Edge {
    /// The sampled value after the transition.
    pub fn state(self) -> bool {
        matches!(self, Edge::Rising)
    }
}

/// Outcome of feeding one sample into a [`Signal`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// The signal transitioned in the direction its polarity cares about.
    Fire(Edge),
    /// No transition, or a transition in the other direction.
    Quiet,
}

impl TriggerDecision {
    /// Whether a trigger should be published.
    pub fn fired(self) -> bool {
        matches!(self, TriggerDecision::Fire(_))
    }
}

/// A binary signal on the field-bus and the last two samples taken of it.
///
/// `previous` and `current` both start out `false`, so a normally-open input
/// that is already closed at startup fires on the first poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// Coil / discrete input address.
    pub address: u16,
    /// Routing key on the bus.
    pub slug: String,
    /// Which edge triggers.
    pub polarity: Polarity,
    /// Whether commands may write this coil.
    pub writable: bool,
    previous: bool,
    current: bool,
}

impl Signal {
    /// Create a signal with both samples cleared.
    pub fn new(address: u16, slug: impl Into<String>, polarity: Polarity, writable: bool) -> Self {
        Self {
            address,
            slug: slug.into(),
            polarity,
            writable,
            previous: false,
            current: false,
        }
    }

    /// Sample taken one tick before [`current`](Self::current).
    pub fn previous(&self) -> bool {
        self.previous
    }

    /// Most recent sample.
    pub fn current(&self) -> bool {
        self.current
    }

    /// Whether the last update went from false to true.
    pub fn rising(&self) -> bool {
        self.current && !self.previous
    }

    /// Whether the last update went from true to false.
    pub fn falling(&self) -> bool {
        !self.current && self.previous
    }

    /// Shift in a new sample and decide whether it is a trigger.
    pub fn update(&mut self, raw: bool) -> TriggerDecision {
        self.previous = std::mem::replace(&mut self.current, raw);

        match self.polarity {
            Polarity::NormallyOpen if self.rising() => TriggerDecision::Fire(Edge::Rising),
            Polarity::NormallyClosed if self.falling() => TriggerDecision::Fire(Edge::Falling),
            _ => TriggerDecision::Quiet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fires(polarity: Polarity, samples: &[bool]) -> usize {
        let mut signal = Signal::new(0, "input", polarity, false);
        samples
            .iter()
            .filter(|&&raw| signal.update(raw).fired())
            .count()
    }

    #[test]
    fn test_normally_open_fires_on_rising() {
        let mut signal = Signal::new(0, "input", Polarity::NormallyOpen, false);
        assert_eq!(signal.update(false), TriggerDecision::Quiet);
        assert_eq!(signal.update(true), TriggerDecision::Fire(Edge::Rising));
    }

    #[test]
    fn test_normally_open_steady_low() {
        assert_eq!(fires(Polarity::NormallyOpen, &[false, false]), 0);
    }

    #[test]
    fn test_normally_open_ignores_falling() {
        assert_eq!(fires(Polarity::NormallyOpen, &[true, false]), 1);
        let mut signal = Signal::new(0, "input", Polarity::NormallyOpen, false);
        let _ = signal.update(true);
        assert_eq!(signal.update(false), TriggerDecision::Quiet);
    }

    #[test]
    fn test_normally_closed_fires_on_falling() {
        let mut signal = Signal::new(0, "input", Polarity::NormallyClosed, false);
        assert_eq!(signal.update(true), TriggerDecision::Quiet);
        assert_eq!(signal.update(false), TriggerDecision::Fire(Edge::Falling));
    }

    #[test]
    fn test_normally_closed_ignores_rising() {
        assert_eq!(fires(Polarity::NormallyClosed, &[false, true, true]), 0);
    }

    #[test]
    fn test_steady_state_fires_once() {
        assert_eq!(fires(Polarity::NormallyOpen, &[false, true, true, true, true]), 1);
        assert_eq!(fires(Polarity::NormallyClosed, &[true, false, false, false]), 1);
    }

    #[test]
    fn test_each_transition_fires() {
        let samples = [false, true, false, true, false, true];
        assert_eq!(fires(Polarity::NormallyOpen, &samples), 3);
        assert_eq!(fires(Polarity::NormallyClosed, &samples), 2);
    }

    #[test]
    fn test_update_shifts_samples() {
        let mut signal = Signal::new(3, "input", Polarity::NormallyOpen, false);
        let _ = signal.update(true);
        assert!(!signal.previous());
        assert!(signal.current());
        assert!(signal.rising());

        let _ = signal.update(false);
        assert!(signal.previous());
        assert!(!signal.current());
        assert!(signal.falling());
    }

    #[test]
    fn test_edge_state() {
        assert!(Edge::Rising.state());
        assert!(!Edge::Falling.state());
    }

    #[test]
    fn test_polarity_names() {
        let no: Polarity = serde_json::from_str("\"no\"").unwrap();
        let nc: Polarity = serde_json::from_str("\"NC\"").unwrap();
        assert_eq!(no, Polarity::NormallyOpen);
        assert_eq!(nc, Polarity::NormallyClosed);
        assert_eq!(Polarity::default(), Polarity::NormallyOpen);
    }
}
