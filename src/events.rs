/// A set of event classes the control loop can wait on. Returned by
/// [`Host::wait_for_event`](crate::Host::wait_for_event) to say which classes
/// are ready; an empty set means the deadline passed.
#[derive(Default, Hash, PartialEq, Eq, Clone, Copy)]
pub struct Events(u8);

impl Events {
    /// The application has written data that has not been sent yet
    pub const APP_DATA: Self = Self(0b001);
    /// The application asked to close its sending direction
    pub const APP_CLOSE_REQUESTED: Self = Self(0b010);
    /// A segment arrived from the peer
    pub const NETWORK_DATA: Self = Self(0b100);
    /// Every event class
    pub const ANY: Self = Self(0b111);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every class in `other` is also in `self`
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub const fn app_data(self) -> bool {
        self.contains(Self::APP_DATA)
    }

    pub const fn close_requested(self) -> bool {
        self.contains(Self::APP_CLOSE_REQUESTED)
    }

    pub const fn network_data(self) -> bool {
        self.contains(Self::NETWORK_DATA)
    }
}

impl std::ops::BitOr for Events {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl std::ops::BitAnd for Events {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = [
            (self.app_data(), "APP_DATA"),
            (self.close_requested(), "APP_CLOSE_REQUESTED"),
            (self.network_data(), "NETWORK_DATA"),
        ];
        let set: Vec<_> = names
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Events({})", set.join(" | "))
    }
}
