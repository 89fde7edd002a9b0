mod delivery;
mod subscription;
mod task_queue;
mod work_item;

pub use delivery::Delivery;
pub use subscription::Subscription;
pub use task_queue::Consumer;
pub use task_queue::QueueError;
pub use task_queue::TaskQueue;
pub use work_item::WorkItem;
