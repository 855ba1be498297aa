pub mod error;
pub mod device;
pub mod proc;
pub mod syscall;
pub mod kernel;
pub mod clock;
pub mod disk;
pub mod stubs;
pub mod libuser;
