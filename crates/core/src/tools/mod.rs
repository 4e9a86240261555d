pub mod args;
mod validation;

pub use args::{
    ArgumentError, CompleteBookingArgs, FunctionName, SearchHotelArgs, SelectRoomArgs,
    StartOverArgs, ToolInvocation,
};
