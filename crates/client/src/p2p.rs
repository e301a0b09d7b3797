//! Direct-path detection.
//!
//! When ICE reports a `host` or `srflx` remote candidate the media path does
//! not go through a relay, so the outbound video cap can be lifted. The
//! detection is sticky: once direct, always direct until `reset`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use phonecast_protocol::{CandidateType, StatsEntry};
use tracing::{debug, info, warn};

use crate::pact::Pact;

/// Source of the peer connection's stats report.
pub trait StatsSource {
    fn stats(&self) -> Pact<Vec<StatsEntry>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodingParameters {
    pub max_bitrate: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendParameters {
    pub encodings: Vec<EncodingParameters>,
}

/// An outbound RTP sender.
pub trait MediaSender {
    fn is_video(&self) -> bool;
    fn parameters(&self) -> SendParameters;
    fn set_parameters(&self, parameters: SendParameters) -> Pact<()>;
}

pub struct P2pOptimizer {
    enabled: bool,
    direct_max_bitrate: u32,
    is_direct: bool,
}

impl P2pOptimizer {
    pub fn new(enabled: bool, direct_max_bitrate: u32) -> Self {
        Self {
            enabled,
            direct_max_bitrate,
            is_direct: false,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.is_direct
    }

    /// Scan a stats report. Returns the (sticky) direct-path flag.
    pub fn observe(&mut self, entries: &[StatsEntry]) -> bool {
        let direct_possible = entries.iter().any(|entry| {
            matches!(
                entry,
                StatsEntry::RemoteCandidate {
                    candidate_type: CandidateType::Host | CandidateType::Srflx,
                    ..
                }
            )
        });
        if direct_possible && !self.is_direct {
            self.is_direct = true;
            info!("Direct ICE path detected");
        }
        self.is_direct
    }

    /// Lift the bitrate cap of the first encoding of every video sender.
    /// Does nothing unless a direct path was detected. Settles with the
    /// number of senders that accepted the new parameters.
    pub fn optimize(&self, senders: &[&dyn MediaSender]) -> Pact<usize> {
        if !self.enabled || !self.is_direct {
            return Pact::resolve(0);
        }
        let max_bitrate = self.direct_max_bitrate;
        let mut updates = Vec::new();
        for sender in senders.iter().filter(|s| s.is_video()) {
            let mut parameters = sender.parameters();
            let Some(first) = parameters.encodings.first_mut() else {
                debug!("Video sender has no encodings, skipping");
                continue;
            };
            first.max_bitrate = Some(max_bitrate);
            updates.push(sender.set_parameters(parameters));
        }
        if updates.is_empty() {
            return Pact::resolve(0);
        }

        let (done, settler) = Pact::deferred();
        let remaining = Rc::new(Cell::new(updates.len()));
        let applied = Rc::new(Cell::new(0usize));
        for update in updates {
            let remaining = Rc::clone(&remaining);
            let applied = Rc::clone(&applied);
            let settler = settler.clone();
            update.on_settled(move |outcome| {
                match outcome {
                    Ok(()) => applied.set(applied.get() + 1),
                    Err(e) => warn!(error = %e, "Failed to raise video bitrate cap"),
                }
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    info!(
                        max_bitrate,
                        senders = applied.get(),
                        "Raised video bitrate cap for direct path"
                    );
                    settler.resolve(applied.get());
                }
            });
        }
        done
    }

    pub fn reset(&mut self) {
        self.is_direct = false;
    }
}

/// Fetch stats and run detection, settling with the direct-path flag.
pub fn detect(optimizer: &Rc<RefCell<P2pOptimizer>>, source: &dyn StatsSource) -> Pact<bool> {
    let optimizer = optimizer.clone();
    source
        .stats()
        .map(move |entries| optimizer.borrow_mut().observe(&entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pact::PactState;

    struct Sender {
        video: bool,
        params: RefCell<SendParameters>,
    }

    impl Sender {
        fn new(video: bool, encodings: usize) -> Self {
            Self {
                video,
                params: RefCell::new(SendParameters {
                    encodings: vec![EncodingParameters::default(); encodings],
                }),
            }
        }
    }

    impl MediaSender for Sender {
        fn is_video(&self) -> bool {
            self.video
        }
        fn parameters(&self) -> SendParameters {
            self.params.borrow().clone()
        }
        fn set_parameters(&self, parameters: SendParameters) -> Pact<()> {
            *self.params.borrow_mut() = parameters;
            Pact::resolve(())
        }
    }

    struct Stats(Vec<StatsEntry>);

    impl StatsSource for Stats {
        fn stats(&self) -> Pact<Vec<StatsEntry>> {
            Pact::resolve(self.0.clone())
        }
    }

    fn candidate(candidate_type: CandidateType) -> StatsEntry {
        StatsEntry::RemoteCandidate {
            candidate_type,
            address: None,
        }
    }

    #[test]
    fn host_or_srflx_means_direct() {
        for kind in [CandidateType::Host, CandidateType::Srflx] {
            let mut p2p = P2pOptimizer::new(true, 8_000_000);
            assert!(p2p.observe(&[StatsEntry::Other, candidate(kind)]));
        }
        let mut relayed = P2pOptimizer::new(true, 8_000_000);
        assert!(!relayed.observe(&[candidate(CandidateType::Relay), candidate(CandidateType::Prflx)]));
    }

    #[test]
    fn detection_is_sticky_until_reset() {
        let mut p2p = P2pOptimizer::new(true, 8_000_000);
        p2p.observe(&[candidate(CandidateType::Host)]);
        assert!(p2p.observe(&[candidate(CandidateType::Relay)]));
        p2p.reset();
        assert!(!p2p.is_direct());
    }

    #[test]
    fn detect_resolves_synchronously() {
        let p2p = Rc::new(RefCell::new(P2pOptimizer::new(true, 8_000_000)));
        let result = detect(&p2p, &Stats(vec![candidate(CandidateType::Srflx)]));
        assert_eq!(result.state(), PactState::Fulfilled);
        assert_eq!(result.try_value(), Some(true));
        assert!(p2p.borrow().is_direct());
    }

    #[test]
    fn optimize_sets_first_video_encoding_only() {
        let mut p2p = P2pOptimizer::new(true, 8_000_000);
        let video = Sender::new(true, 2);
        let audio = Sender::new(false, 1);
        let empty = Sender::new(true, 0);

        assert_eq!(p2p.optimize(&[&video, &audio]).try_value(), Some(0), "not direct yet");
        p2p.observe(&[candidate(CandidateType::Host)]);
        assert_eq!(p2p.optimize(&[&video, &audio, &empty]).try_value(), Some(1));

        let params = video.params.borrow();
        assert_eq!(params.encodings[0].max_bitrate, Some(8_000_000));
        assert_eq!(params.encodings[1].max_bitrate, None);
        assert_eq!(audio.params.borrow().encodings[0].max_bitrate, None);
    }

    #[test]
    fn disabled_optimizer_leaves_senders_alone() {
        let mut p2p = P2pOptimizer::new(false, 8_000_000);
        p2p.observe(&[candidate(CandidateType::Host)]);
        let video = Sender::new(true, 1);
        assert_eq!(p2p.optimize(&[&video]).try_value(), Some(0));
    }

    /// Sender whose parameter update is refused, then settled by the test.
    struct Refusing(RefCell<Option<crate::pact::Settler<()>>>);

    impl MediaSender for Refusing {
        fn is_video(&self) -> bool {
            true
        }
        fn parameters(&self) -> SendParameters {
            SendParameters {
                encodings: vec![EncodingParameters::default()],
            }
        }
        fn set_parameters(&self, _: SendParameters) -> Pact<()> {
            let (pact, settler) = Pact::deferred();
            *self.0.borrow_mut() = Some(settler);
            pact
        }
    }

    #[test]
    fn refused_updates_are_not_counted() {
        let mut p2p = P2pOptimizer::new(true, 8_000_000);
        p2p.observe(&[candidate(CandidateType::Host)]);
        let accepted = Sender::new(true, 1);
        let refused = Refusing(RefCell::new(None));

        let senders: [&dyn MediaSender; 2] = [&accepted, &refused];
        let result = p2p.optimize(&senders);
        assert_eq!(result.state(), PactState::Pending);

        let settler = refused.0.borrow_mut().take().unwrap();
        settler.reject(crate::pact::PactError::msg("invalid parameters"));
        assert_eq!(result.try_value(), Some(1));
    }
}
