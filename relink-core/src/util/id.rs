use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crossbeam::atomic::AtomicCell;

pub type Sequence = u64;
static SEQUENCE: AtomicCell<Sequence> = AtomicCell::new(1);

/// A process-local identifier for things that only live as long as the process,
/// like sessions. Never persisted.
pub struct LocalId<T> {
    value: Sequence,
    kind: PhantomData<fn() -> T>,
}

impl<T> LocalId<T> {
    /// Takes the next value from the process-wide sequence.
    pub fn next() -> Self {
        Self {
            value: SEQUENCE.fetch_add(1),
            kind: PhantomData,
        }
    }

    pub fn value(&self) -> Sequence {
        self.value
    }
}

impl<T> Debug for LocalId<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.value)
    }
}

impl<T> Display for LocalId<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.value)
    }
}

impl<T> PartialEq for LocalId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Hash for LocalId<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state)
    }
}

impl<T> Clone for LocalId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for LocalId<T> {}
impl<T> Eq for LocalId<T> {}

#[cfg(test)]
mod test {
    use super::LocalId;

    struct Marker;

    #[test]
    fn local_ids_are_unique_and_increasing() {
        let first = LocalId::<Marker>::next();
        let second = LocalId::<Marker>::next();

        assert_ne!(first, second);
        assert!(second.value() > first.value());
    }
}
