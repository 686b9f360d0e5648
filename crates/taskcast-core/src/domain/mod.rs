//! Domain model (IDs, task vocabulary, state machine, progress, events).

pub mod events;
pub mod ids;
pub mod progress;
pub mod state;
pub mod task;

pub use events::{EventType, StreamEvent};
pub use ids::{Id, IdMarker, SubscriberId, TaskId};
pub use progress::{CompletedStage, CostTracking, ModelCost, ProgressState, Warning};
pub use state::{TaskEvent, Transition, transition};
pub use task::{Priority, TaskStatus, TaskType};
