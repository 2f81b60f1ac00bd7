pub mod assignment;
pub mod load;
pub mod notification;
pub mod trip;
pub mod vehicle;
pub mod verification;
