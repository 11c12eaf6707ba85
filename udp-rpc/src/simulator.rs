//! Optional fault injection for the socket layer.
//!
//! Real networks drop and duplicate datagrams.  To exercise the retry and
//! duplicate-suppression paths without depending on actual network
//! conditions, a [`crate::socket::Socket`] can carry a [`Simulator`] that
//! decides, per datagram, whether to deliver it:
//!
//! | Fault        | Description                                            |
//! |--------------|--------------------------------------------------------|
//! | Send loss    | Drop an outgoing datagram with probability `loss_rate`.|
//! | Receive loss | Drop an incoming datagram with probability `recv_loss_rate`. |
//! | Duplication  | Send an outgoing datagram twice.                       |
//!
//! With a `seed` the fault sequence is reproducible.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Configuration for the fault model.
///
/// All probabilities are clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Probability that an outgoing datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that an incoming datagram is silently dropped.
    pub recv_loss_rate: f64,
    /// Probability that a delivered outgoing datagram is sent twice.
    pub duplicate_rate: f64,
    /// RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            recv_loss_rate: 0.0,
            duplicate_rate: 0.0,
            seed: None,
        }
    }
}

impl SimulatorConfig {
    /// Drop every outgoing datagram with probability `rate`.
    pub fn lossy(rate: f64) -> Self {
        Self {
            loss_rate: rate,
            ..Self::default()
        }
    }

    /// `true` when no fault can ever fire.
    pub fn is_transparent(&self) -> bool {
        self.loss_rate <= 0.0 && self.recv_loss_rate <= 0.0 && self.duplicate_rate <= 0.0
    }
}

/// What to do with one outgoing datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFate {
    Drop,
    Deliver,
    Duplicate,
}

/// Per-socket fault decision engine.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    fn roll(&self, probability: f64) -> bool {
        let p = probability.clamp(0.0, 1.0);
        if p == 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.random_bool(p)
    }

    /// Decide the fate of an outgoing datagram.
    pub fn on_send(&self) -> SendFate {
        if self.roll(self.config.loss_rate) {
            SendFate::Drop
        } else if self.roll(self.config.duplicate_rate) {
            SendFate::Duplicate
        } else {
            SendFate::Deliver
        }
    }

    /// `true` if an incoming datagram should be discarded.
    pub fn drop_incoming(&self) -> bool {
        self.roll(self.config.recv_loss_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_pass_through() {
        let sim = Simulator::new(SimulatorConfig::default());
        assert!(sim.config().is_transparent());
        for _ in 0..100 {
            assert_eq!(sim.on_send(), SendFate::Deliver);
            assert!(!sim.drop_incoming());
        }
    }

    #[test]
    fn full_loss_drops_everything() {
        let sim = Simulator::new(SimulatorConfig::lossy(1.0));
        for _ in 0..100 {
            assert_eq!(sim.on_send(), SendFate::Drop);
        }
    }

    #[test]
    fn out_of_range_rates_are_clamped() {
        let sim = Simulator::new(SimulatorConfig {
            loss_rate: 7.0,
            recv_loss_rate: -1.0,
            ..SimulatorConfig::default()
        });
        assert_eq!(sim.on_send(), SendFate::Drop);
        assert!(!sim.drop_incoming());
    }

    #[test]
    fn always_duplicate() {
        let sim = Simulator::new(SimulatorConfig {
            duplicate_rate: 1.0,
            ..SimulatorConfig::default()
        });
        assert_eq!(sim.on_send(), SendFate::Duplicate);
    }

    #[test]
    fn same_seed_same_fault_sequence() {
        let config = SimulatorConfig {
            loss_rate: 0.5,
            seed: Some(42),
            ..SimulatorConfig::default()
        };
        let a = Simulator::new(config.clone());
        let b = Simulator::new(config);
        let fates_a: Vec<_> = (0..64).map(|_| a.on_send()).collect();
        let fates_b: Vec<_> = (0..64).map(|_| b.on_send()).collect();
        assert_eq!(fates_a, fates_b);
        assert!(fates_a.contains(&SendFate::Drop));
        assert!(fates_a.contains(&SendFate::Deliver));
    }
}
