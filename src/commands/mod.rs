pub mod extract;
pub mod init;
pub mod status;
