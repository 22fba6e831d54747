pub mod aws_profile;
pub mod deploy;
pub mod down;
pub mod exec;
pub mod tunnel;
pub mod up;
