use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use easel_core::{ArtifactDescriptor, ErrorKind, FailureInfo, Fingerprint};
use tokio::sync::watch;

/// Outcome delivered to every subscriber of one fingerprint
type Outcome = Result<ArtifactDescriptor, FailureInfo>;

/// Content-addressed cache of completed generations, with at-most-one
/// in-flight generation per fingerprint
#[derive(Clone, Default)]
pub struct FingerprintCache {
    slots: Arc<DashMap<Fingerprint, Slot>>,
}

enum Slot {
    /// A generation finished and its descriptor is cached
    Committed(ArtifactDescriptor),
    /// A generation is running; the sender resolves all waiters
    InFlight(watch::Sender<Option<Outcome>>),
}

/// Result of a reservation attempt
pub enum Reserve {
    /// Caller owns the generation and must commit or abort
    Reserved(Reservation),
    /// Another caller owns it; await the shared outcome
    InFlight(Waiter),
    /// A commit raced in between lookup and reserve
    Cached(ArtifactDescriptor),
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a committed entry
    pub fn lookup(&self, fingerprint: Fingerprint) -> Option<ArtifactDescriptor> {
        match self.slots.get(&fingerprint)?.value() {
            Slot::Committed(entry) => Some(entry.clone()),
            Slot::InFlight(_) => None,
        }
    }

    /// Atomically claim the right to generate for a fingerprint
    ///
    /// With `force` set, an existing committed entry is evicted and
    /// regenerated; concurrent forced callers still collapse onto one
    /// in-flight generation (last writer wins, writes never interleave).
    pub fn reserve(&self, fingerprint: Fingerprint, force: bool) -> Reserve {
        match self.slots.entry(fingerprint) {
            Entry::Occupied(mut occupied) => match occupied.get() {
                Slot::Committed(entry) if !force => Reserve::Cached(entry.clone()),
                Slot::Committed(_) => {
                    let (tx, _) = watch::channel(None);
                    occupied.insert(Slot::InFlight(tx.clone()));
                    Reserve::Reserved(Reservation {
                        cache: self.clone(),
                        fingerprint,
                        tx,
                        resolved: false,
                    })
                }
                Slot::InFlight(tx) => Reserve::InFlight(Waiter { rx: tx.subscribe() }),
            },
            Entry::Vacant(vacant) => {
                let (tx, _) = watch::channel(None);
                vacant.insert(Slot::InFlight(tx.clone()));
                Reserve::Reserved(Reservation {
                    cache: self.clone(),
                    fingerprint,
                    tx,
                    resolved: false,
                })
            }
        }
    }
}

/// Exclusive right to run one generation for a fingerprint
///
/// Must be resolved with [`commit`](Self::commit) or
/// [`abort`](Self::abort); dropping an unresolved reservation behaves as an
/// abort so waiters are never stranded.
pub struct Reservation {
    cache: FingerprintCache,
    fingerprint: Fingerprint,
    tx: watch::Sender<Option<Outcome>>,
    resolved: bool,
}

impl Reservation {
    /// Store the entry and release all waiters with it
    pub fn commit(mut self, entry: ArtifactDescriptor) {
        self.resolved = true;
        self.cache
            .slots
            .insert(self.fingerprint, Slot::Committed(entry.clone()));
        self.tx.send_replace(Some(Ok(entry)));
    }

    /// Release all waiters with the failure, leaving the fingerprint
    /// uncached so a later request retries cleanly
    pub fn abort(mut self, failure: FailureInfo) {
        self.resolved = true;
        self.cache.slots.remove(&self.fingerprint);
        self.tx.send_replace(Some(Err(failure)));
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        tracing::warn!(fingerprint = %self.fingerprint, "reservation dropped unresolved");
        self.cache.slots.remove(&self.fingerprint);
        self.tx.send_replace(Some(Err(FailureInfo {
            kind: ErrorKind::Unknown,
            provider: String::new(),
            message: "generation abandoned before completion".to_owned(),
            attempts: 0,
        })));
    }
}

/// Subscription to an in-flight generation's outcome
pub struct Waiter {
    rx: watch::Receiver<Option<Outcome>>,
}

impl Waiter {
    /// Wait for the owning caller's commit or abort
    pub async fn outcome(mut self) -> Outcome {
        loop {
            if let Some(outcome) = self.rx.borrow_and_update().clone() {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                // Owner vanished without resolving; its Drop already pushed
                // a failure unless the process is tearing down
                return Err(FailureInfo {
                    kind: ErrorKind::Unknown,
                    provider: String::new(),
                    message: "generation abandoned before completion".to_owned(),
                    attempts: 0,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use easel_core::{ArtifactReference, GenerationRequest};
    use indexmap::IndexMap;

    use super::*;

    fn fingerprint(prompt: &str) -> Fingerprint {
        Fingerprint::of(&GenerationRequest {
            provider: "gemini".to_owned(),
            model: "gemini-2.5-flash-image".to_owned(),
            prompt: prompt.to_owned(),
            width: 512,
            height: 512,
            seed: None,
            template: None,
            params: IndexMap::new(),
        })
    }

    fn entry(sha: &str) -> ArtifactDescriptor {
        ArtifactDescriptor {
            sha256: sha.to_owned(),
            reference: ArtifactReference(format!("mem/{sha}")),
            provider: "gemini".to_owned(),
            model: "gemini-2.5-flash-image".to_owned(),
            created_at: jiff::Timestamp::UNIX_EPOCH,
            response_id: None,
            usage: None,
        }
    }

    fn failure() -> FailureInfo {
        FailureInfo {
            kind: ErrorKind::Transient,
            provider: "gemini".to_owned(),
            message: "upstream 503".to_owned(),
            attempts: 3,
        }
    }

    #[test]
    fn lookup_misses_until_commit() {
        let cache = FingerprintCache::new();
        let fp = fingerprint("a");
        assert!(cache.lookup(fp).is_none());

        let Reserve::Reserved(reservation) = cache.reserve(fp, false) else {
            panic!("expected exclusive reservation");
        };
        assert!(cache.lookup(fp).is_none(), "in-flight is not a hit");

        reservation.commit(entry("aa"));
        assert_eq!(cache.lookup(fp).unwrap().sha256, "aa");
    }

    #[test]
    fn second_reserve_waits_on_first() {
        let cache = FingerprintCache::new();
        let fp = fingerprint("a");

        let Reserve::Reserved(_owner) = cache.reserve(fp, false) else {
            panic!("expected exclusive reservation");
        };
        assert!(matches!(cache.reserve(fp, false), Reserve::InFlight(_)));
    }

    #[tokio::test]
    async fn concurrent_reserves_yield_one_owner() {
        let cache = FingerprintCache::new();
        let fp = fingerprint("a");

        let mut owners = 0;
        let mut waiters = Vec::new();
        for _ in 0..8 {
            match cache.reserve(fp, false) {
                Reserve::Reserved(r) => {
                    owners += 1;
                    // Resolve from a task so waiters can be awaited below
                    tokio::spawn(async move { r.commit(entry("aa")) });
                }
                Reserve::InFlight(w) => waiters.push(w),
                Reserve::Cached(_) => panic!("nothing committed yet"),
            }
        }

        assert_eq!(owners, 1);
        for waiter in waiters {
            assert_eq!(waiter.outcome().await.unwrap().sha256, "aa");
        }
    }

    #[tokio::test]
    async fn abort_releases_waiters_and_uncaches() {
        let cache = FingerprintCache::new();
        let fp = fingerprint("a");

        let Reserve::Reserved(owner) = cache.reserve(fp, false) else {
            panic!("expected exclusive reservation");
        };
        let Reserve::InFlight(waiter) = cache.reserve(fp, false) else {
            panic!("expected waiter");
        };

        owner.abort(failure());
        let err = waiter.outcome().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transient);

        // A later request starts fresh
        assert!(cache.lookup(fp).is_none());
        assert!(matches!(cache.reserve(fp, false), Reserve::Reserved(_)));
    }

    #[tokio::test]
    async fn dropped_reservation_acts_as_abort() {
        let cache = FingerprintCache::new();
        let fp = fingerprint("a");

        let Reserve::Reserved(owner) = cache.reserve(fp, false) else {
            panic!("expected exclusive reservation");
        };
        let Reserve::InFlight(waiter) = cache.reserve(fp, false) else {
            panic!("expected waiter");
        };

        drop(owner);
        assert_eq!(waiter.outcome().await.unwrap_err().kind, ErrorKind::Unknown);
        assert!(matches!(cache.reserve(fp, false), Reserve::Reserved(_)));
    }

    #[test]
    fn forced_reserve_regenerates_over_committed() {
        let cache = FingerprintCache::new();
        let fp = fingerprint("a");

        let Reserve::Reserved(first) = cache.reserve(fp, false) else {
            panic!("expected exclusive reservation");
        };
        first.commit(entry("aa"));

        // Normal reserve short-circuits to the cached entry
        assert!(matches!(cache.reserve(fp, false), Reserve::Cached(_)));

        // Forced reserve claims exclusivity again; concurrent forced callers
        // become waiters on the same regeneration
        let Reserve::Reserved(second) = cache.reserve(fp, true) else {
            panic!("expected exclusive reservation");
        };
        assert!(matches!(cache.reserve(fp, true), Reserve::InFlight(_)));

        second.commit(entry("bb"));
        assert_eq!(cache.lookup(fp).unwrap().sha256, "bb");
    }
}
