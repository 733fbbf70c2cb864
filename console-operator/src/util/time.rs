//! Small helpers bridging `k8s_openapi`'s `Time` (a `jiff::Timestamp`
//! wrapper) to plain Unix seconds, which is all the TTL/expiry
//! arithmetic in this package needs.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::jiff::Timestamp;

pub fn now_unix() -> i64 {
    Timestamp::now().as_second()
}

pub fn to_unix(time: &Time) -> i64 {
    time.0.as_second()
}

pub fn from_unix(seconds: i64) -> Time {
    Time(Timestamp::from_second(seconds).unwrap_or(Timestamp::UNIX_EPOCH))
}

pub fn add_seconds(time: &Time, seconds: i64) -> Time {
    from_unix(to_unix(time) + seconds)
}
