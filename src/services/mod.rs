pub mod areas;
pub mod fields;
pub mod forecast;
pub mod history;
pub mod normalize;
pub mod opendata;
pub mod sensors;
pub mod timeseries;
