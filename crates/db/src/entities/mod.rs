//! Database entities.

pub mod blocking;
pub mod change_event;
pub mod friendship;
pub mod notification;
pub mod user;

pub use blocking::Entity as Blocking;
pub use change_event::Entity as ChangeEvent;
pub use friendship::Entity as Friendship;
pub use notification::Entity as Notification;
pub use user::Entity as User;
