// crewline-common: shared types for the Crewline realtime gateway

pub mod protocol;
pub mod types;
