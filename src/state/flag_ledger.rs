//! Ordered, per-player collection of the flags submitted for one session.

use std::time::SystemTime;

use thiserror::Error;
use uuid::Uuid;

use crate::state::session::{Flag, ImageRef, Side};

/// Maximum number of flags a single side may submit.
pub const MAX_FLAGS: usize = 5;

/// Errors raised by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The side already owns flags in this ledger.
    #[error("{0} already submitted flags")]
    AlreadySubmitted(Side),
    /// Submission outside `1..=MAX_FLAGS` images.
    #[error("expected between 1 and {max} images, got {0}", max = MAX_FLAGS)]
    InvalidCount(usize),
}

/// Append-only ledger holding both sides' flags, ordered by reveal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagLedger {
    session_id: Uuid,
    flags: Vec<Flag>,
}

impl FlagLedger {
    /// Empty ledger for a new session.
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            flags: Vec::new(),
        }
    }

    /// Rebuild a ledger from stored flags.
    pub fn from_flags(session_id: Uuid, mut flags: Vec<Flag>) -> Self {
        sort_by_reveal_order(&mut flags);
        Self { session_id, flags }
    }

    /// Atomically append `images` for `owner`, assigning reveal orders `1..=N`
    /// in list order. Nothing is written when the call is rejected.
    pub fn submit(
        &mut self,
        owner: Side,
        images: Vec<ImageRef>,
        now: SystemTime,
    ) -> Result<Vec<Flag>, LedgerError> {
        if self.has_flags(owner) {
            return Err(LedgerError::AlreadySubmitted(owner));
        }
        if images.is_empty() || images.len() > MAX_FLAGS {
            return Err(LedgerError::InvalidCount(images.len()));
        }

        let created: Vec<Flag> = images
            .into_iter()
            .zip(1u8..)
            .map(|(image, reveal_order)| Flag {
                id: Uuid::new_v4(),
                session_id: self.session_id,
                owner_is_host: owner.is_host(),
                image_ref: image.image_ref,
                thumbnail_ref: image.thumbnail_ref,
                source: image.source,
                reveal_order,
                is_revealed: false,
                created_at: now,
            })
            .collect();

        self.flags.extend(created.iter().cloned());
        sort_by_reveal_order(&mut self.flags);
        Ok(created)
    }

    /// Reveal `owner`'s unrevealed flag with the smallest reveal order.
    pub fn reveal_next(&mut self, owner: Side) -> Option<Flag> {
        let next = self
            .flags
            .iter_mut()
            .filter(|flag| flag.owner() == owner && !flag.is_revealed)
            .min_by_key(|flag| flag.reveal_order)?;
        next.is_revealed = true;
        Some(next.clone())
    }

    /// All flags ordered by reveal order (host before guest on ties).
    pub fn snapshot(&self) -> Vec<Flag> {
        self.flags.clone()
    }

    /// Flags owned by `side`, in reveal order.
    pub fn for_side(&self, side: Side) -> impl Iterator<Item = &Flag> {
        self.flags.iter().filter(move |flag| flag.owner() == side)
    }

    /// Whether `side` owns any flag.
    pub fn has_flags(&self, side: Side) -> bool {
        self.for_side(side).next().is_some()
    }

    /// Count of `side`'s flags still hidden.
    pub fn remaining(&self, side: Side) -> usize {
        self.for_side(side).filter(|flag| !flag.is_revealed).count()
    }

    /// Every flag of both sides is revealed.
    pub fn is_complete(&self) -> bool {
        is_complete(&self.flags)
    }

    /// Drop every flag owned by `side`.
    pub(crate) fn discard(&mut self, side: Side) {
        self.flags.retain(|flag| flag.owner() != side);
    }

    /// Consume the ledger, yielding its flags in reveal order.
    pub fn into_flags(self) -> Vec<Flag> {
        self.flags
    }
}

/// Completion is derived from data only: both sides hold flags and all of them are revealed.
pub fn is_complete(flags: &[Flag]) -> bool {
    let host = flags.iter().any(|flag| flag.owner_is_host);
    let guest = flags.iter().any(|flag| !flag.owner_is_host);
    host && guest && flags.iter().all(|flag| flag.is_revealed)
}

fn sort_by_reveal_order(flags: &mut [Flag]) {
    flags.sort_by_key(|flag| (flag.reveal_order, !flag.owner_is_host));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::session::FlagSource;

    fn images(refs: &[&str]) -> Vec<ImageRef> {
        refs.iter()
            .map(|image| ImageRef {
                image_ref: (*image).to_string(),
                thumbnail_ref: None,
                source: FlagSource::Search,
            })
            .collect()
    }

    fn refs(ledger: &FlagLedger, side: Side) -> Vec<(String, u8, bool)> {
        ledger
            .for_side(side)
            .map(|flag| (flag.image_ref.clone(), flag.reveal_order, flag.is_revealed))
            .collect()
    }

    #[test]
    fn submit_assigns_dense_reveal_orders_in_list_order() {
        let mut ledger = FlagLedger::new(Uuid::new_v4());
        ledger
            .submit(Side::Host, images(&["a", "b", "c"]), SystemTime::now())
            .unwrap();

        assert_eq!(
            refs(&ledger, Side::Host),
            vec![
                ("a".to_string(), 1, false),
                ("b".to_string(), 2, false),
                ("c".to_string(), 3, false),
            ]
        );
    }

    #[test]
    fn rejected_submission_leaves_ledger_untouched() {
        let mut ledger = FlagLedger::new(Uuid::new_v4());
        ledger
            .submit(Side::Guest, images(&["x"]), SystemTime::now())
            .unwrap();
        let before = ledger.clone();

        assert_eq!(
            ledger.submit(Side::Guest, images(&["y"]), SystemTime::now()),
            Err(LedgerError::AlreadySubmitted(Side::Guest))
        );
        assert_eq!(
            ledger.submit(Side::Host, Vec::new(), SystemTime::now()),
            Err(LedgerError::InvalidCount(0))
        );
        assert_eq!(
            ledger.submit(
                Side::Host,
                images(&["1", "2", "3", "4", "5", "6"]),
                SystemTime::now()
            ),
            Err(LedgerError::InvalidCount(6))
        );
        assert_eq!(ledger, before);
    }

    #[test]
    fn reveal_next_walks_owner_flags_in_order() {
        let mut ledger = FlagLedger::new(Uuid::new_v4());
        ledger
            .submit(Side::Host, images(&["a", "b"]), SystemTime::now())
            .unwrap();
        ledger
            .submit(Side::Guest, images(&["z"]), SystemTime::now())
            .unwrap();

        assert_eq!(ledger.reveal_next(Side::Host).unwrap().image_ref, "a");
        assert_eq!(ledger.remaining(Side::Host), 1);
        assert_eq!(ledger.remaining(Side::Guest), 1);
        assert_eq!(ledger.reveal_next(Side::Host).unwrap().image_ref, "b");
        assert!(ledger.reveal_next(Side::Host).is_none());
        assert!(!ledger.is_complete());

        ledger.reveal_next(Side::Guest).unwrap();
        assert!(ledger.is_complete());
    }

    #[test]
    fn snapshot_is_ordered_by_reveal_order() {
        let mut ledger = FlagLedger::new(Uuid::new_v4());
        ledger
            .submit(Side::Guest, images(&["g1", "g2"]), SystemTime::now())
            .unwrap();
        ledger
            .submit(Side::Host, images(&["h1", "h2", "h3"]), SystemTime::now())
            .unwrap();

        let order: Vec<_> = ledger
            .snapshot()
            .into_iter()
            .map(|flag| flag.image_ref)
            .collect();
        assert_eq!(order, vec!["h1", "g1", "h2", "g2", "h3"]);
    }

    #[test]
    fn empty_or_one_sided_ledger_is_never_complete() {
        let mut ledger = FlagLedger::new(Uuid::new_v4());
        assert!(!ledger.is_complete());

        ledger
            .submit(Side::Host, images(&["a"]), SystemTime::now())
            .unwrap();
        ledger.reveal_next(Side::Host);
        assert!(!ledger.is_complete());
    }
}
