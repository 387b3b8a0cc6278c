pub mod ids;
pub mod priority;
pub mod record;
pub mod history;
pub mod events;
pub mod message;
pub mod view;

pub use ids::{JobId, ClaimToken};
pub use priority::JobPriority;
pub use record::{JobRecord, JobStatus, StatusUpdate};
pub use history::{HistoryEntry, DeadLetterRecord};
pub use events::JobEvent;
pub use message::SubmitJob;
pub use view::{JobView, JobSummary};
