use serde::Deserialize;
use time::serde::rfc3339;
use time::OffsetDateTime;

/// One daily observation. Only the close is used by the rebalancer; the remaining fields of the
/// upstream payload are ignored.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    #[serde(rename = "t", with = "rfc3339")]
    pub time: OffsetDateTime,
    #[serde(rename = "c")]
    pub close: f64,
}

impl Bar {
    pub fn new(time: OffsetDateTime, close: f64) -> Self {
        Self { time, close }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_upstream_bar() {
        let json = r#"{"t":"2024-03-04T05:00:00Z","o":10.5,"h":11.0,"l":10.1,"c":10.9,"v":120000,"n":55,"vw":10.7}"#;
        let bar: Bar = serde_json::from_str(json).unwrap();
        assert_eq!(bar.time, datetime!(2024-03-04 05:00 UTC));
        assert_eq!(bar.close, 10.9);
    }
}
