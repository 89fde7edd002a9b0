use crate::queue::WorkItem;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::Rng;

const PAYLOAD_LEN: usize = 5;

pub(crate) struct PayloadGenerator {
    rng: StdRng,
}

impl PayloadGenerator {
    pub(crate) fn new(rng: StdRng) -> Self {
        PayloadGenerator { rng }
    }

    /// A short random ASCII alphanumeric payload, e.g. "AB3x9".
    pub(crate) fn generate(&mut self) -> WorkItem {
        let payload: String = (&mut self.rng)
            .sample_iter(&Alphanumeric)
            .take(PAYLOAD_LEN)
            .map(char::from)
            .collect();
        WorkItem::from(payload)
    }
}
