pub mod google;
pub mod notification;
pub mod resource;
pub mod user;

pub use google::{GoogleTokenVerifier, TokenInfoVerifier};
pub use notification::NotificationService;
pub use resource::ResourceService;
pub use user::UserService;
