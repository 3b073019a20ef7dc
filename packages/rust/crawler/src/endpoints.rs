//! Request paths of the vehicle catalog service.
//!
//! Paths are relative to the configured base URL; the client appends the
//! `fmt` and `api_key` query parameters.

/// Every make with its models and model years for `year`.
pub fn listing_path(year: u32) -> String {
    format!("/api/vehicle/v2/makes?state=new&year={year}&view=full")
}

/// Full style records for one make/model/year.
pub fn styles_path(make: &str, model: &str, year: u32) -> String {
    format!("/api/vehicle/v2/{make}/{model}/{year}/styles?view=full")
}

/// Owner rating aggregate for one make/model/year, first page of reviews only.
pub fn rating_path(make: &str, model: &str, year: u32) -> String {
    format!("/api/vehiclereviews/v2/{make}/{model}/{year}?sortby=thumbsUp%3AASC&pagenum=1&pagesize=10")
}
