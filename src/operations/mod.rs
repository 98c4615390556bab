pub mod signup;

pub use signup::{SignupOperation, SignupRequest, SIGNUP_OPERATION};
