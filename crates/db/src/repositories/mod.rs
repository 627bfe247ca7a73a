//! Database repositories.

pub mod blocking;
pub mod change_event;
pub mod friendship;
pub mod notification;
pub mod user;

pub use blocking::BlockingRepository;
pub use change_event::ChangeEventRepository;
pub use friendship::{FriendshipRepository, ListKind};
pub use notification::NotificationRepository;
pub use user::UserRepository;
