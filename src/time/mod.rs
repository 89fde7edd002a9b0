mod clock;

pub use clock::mocked_clock;
pub use clock::Clock;
pub use clock::MockClock;
pub use clock::MockClockController;
pub use clock::RealClock;

pub(crate) use clock::to_chrono;
pub(crate) use clock::sleep_or_cancelled;
