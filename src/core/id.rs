use std::fmt::Display;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::lock::Mutex;
use serde::{
    de::{
        Unexpected,
        Visitor,
    },
    Deserialize,
    Serialize,
};
use thiserror::Error;

use crate::core::hash::HashSet;

/// An identifier on a WAMP message.
///
/// Request IDs are allocated by the peer; session, subscription, registration, and publication
/// IDs are allocated by the router.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Id(u64);

impl Id {
    pub const MAX: u64 = 1 << 53;
    pub const MIN: u64 = 1;
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error)]
#[error("{value} is out of range for IDs")]
pub struct IdOutOfRange {
    value: u64,
}

impl IdOutOfRange {
    fn new(value: u64) -> Self {
        Self { value }
    }
}

impl TryFrom<u64> for Id {
    type Error = IdOutOfRange;
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value < Self::MIN || value > Self::MAX {
            Err(IdOutOfRange::new(value))
        } else {
            Ok(Id(value))
        }
    }
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = Id;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            "an unsigned integer in the range [{}, {}]",
            Id::MIN,
            Id::MAX
        )
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Id::try_from(v).map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_u64(IdVisitor)
    }
}

/// An allocator for request IDs.
///
/// Allocated IDs are held until released, so an ID can never identify two outstanding requests
/// at once. The session releases a request ID as soon as any correlating response arrives.
#[async_trait]
pub trait IdAllocator: Send + Sync {
    /// Generates an ID that is not currently held.
    async fn generate_id(&self) -> Result<Id>;

    /// Releases a held ID, making it available for allocation again.
    async fn release_id(&self, id: Id);

    /// Resets the allocator, releasing every held ID.
    async fn reset(&self);
}

#[derive(Default)]
struct SequentialIdAllocatorState {
    next: u64,
    held: HashSet<u64>,
}

/// An [`IdAllocator`] that hands out IDs in increasing order, wrapping around at the end of the
/// ID range.
pub struct SequentialIdAllocator {
    state: Mutex<SequentialIdAllocatorState>,
}

impl Default for SequentialIdAllocator {
    fn default() -> Self {
        Self {
            state: Mutex::new(SequentialIdAllocatorState {
                next: Id::MIN,
                held: HashSet::default(),
            }),
        }
    }
}

#[async_trait]
impl IdAllocator for SequentialIdAllocator {
    async fn generate_id(&self) -> Result<Id> {
        let mut state = self.state.lock().await;
        loop {
            let candidate = state.next;
            state.next = if candidate == Id::MAX {
                Id::MIN
            } else {
                candidate + 1
            };
            if state.held.insert(candidate) {
                return Ok(Id(candidate));
            }
        }
    }

    async fn release_id(&self, id: Id) {
        self.state.lock().await.held.remove(&id.0);
    }

    async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.next = Id::MIN;
        state.held.clear();
    }
}

/// An [`IdAllocator`] that draws IDs uniformly from the ID range.
#[derive(Default)]
pub struct RandomIdAllocator {
    held: Mutex<HashSet<u64>>,
}

#[async_trait]
impl IdAllocator for RandomIdAllocator {
    async fn generate_id(&self) -> Result<Id> {
        let mut held = self.held.lock().await;
        loop {
            let candidate = (rand::random::<u64>() & (Id::MAX - 1)) + 1;
            if held.insert(candidate) {
                return Ok(Id(candidate));
            }
        }
    }

    async fn release_id(&self, id: Id) {
        self.held.lock().await.remove(&id.0);
    }

    async fn reset(&self) {
        self.held.lock().await.clear();
    }
}

#[cfg(test)]
mod id_test {
    use crate::core::id::{
        Id,
        IdAllocator,
        RandomIdAllocator,
        SequentialIdAllocator,
    };

    #[test]
    fn fails_deserialization_out_of_range() {
        assert_matches::assert_matches!(serde_json::from_str::<Id>(r#"0"#), Err(err) => {
            assert!(err.to_string().contains("expected an unsigned integer in the range"));
        });
        assert_matches::assert_matches!(serde_json::from_str::<Id>(r#"9007199254740993"#), Err(err) => {
            assert!(err.to_string().contains("expected an unsigned integer in the range"));
        });
    }

    #[tokio::test]
    async fn sequential_allocator_allocates_in_order() {
        let allocator = SequentialIdAllocator::default();
        assert_eq!(
            allocator.generate_id().await.unwrap(),
            Id::try_from(1).unwrap()
        );
        assert_eq!(
            allocator.generate_id().await.unwrap(),
            Id::try_from(2).unwrap()
        );
        assert_eq!(
            allocator.generate_id().await.unwrap(),
            Id::try_from(3).unwrap()
        );
    }

    #[tokio::test]
    async fn sequential_allocator_reissues_ids_after_reset() {
        let allocator = SequentialIdAllocator::default();
        allocator.generate_id().await.unwrap();
        allocator.generate_id().await.unwrap();

        allocator.reset().await;

        assert_eq!(
            allocator.generate_id().await.unwrap(),
            Id::try_from(1).unwrap()
        );
    }

    #[tokio::test]
    async fn sequential_allocator_never_reissues_outstanding_ids() {
        let allocator = SequentialIdAllocator::default();
        let first = allocator.generate_id().await.unwrap();
        let second = allocator.generate_id().await.unwrap();
        allocator.release_id(first).await;

        // Allocation moves forward; a released ID does not come back until the range wraps, and
        // an outstanding one never does.
        let third = allocator.generate_id().await.unwrap();
        assert_ne!(third, second);
        assert_eq!(third, Id::try_from(3).unwrap());
    }

    #[tokio::test]
    async fn random_allocator_generates_unique_ids() {
        let allocator = RandomIdAllocator::default();
        let first = allocator.generate_id().await.unwrap();
        let second = allocator.generate_id().await.unwrap();
        assert_ne!(first, second);
    }
}
