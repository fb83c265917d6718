pub mod bezrealitky;
pub mod bravis;
pub mod idnes;
pub mod realcity;
pub mod realingo;
pub mod ulovdomov;
