use std::time::{SystemTime, UNIX_EPOCH};

use httpdate::HttpDate;

/// Formats a time as RFC 1123 with a numeric zone, e.g.
/// `Tue, 15 Nov 1994 08:12:31 +0000`
///
/// Times before the Unix epoch are clamped to it.
pub fn format_date(time: SystemTime) -> String {
    let time = time.max(UNIX_EPOCH);
    let mut s = HttpDate::from(time).to_string();
    if s.ends_with(" GMT") {
        // httpdate always renders the obsolete `GMT` zone,
        // https://tools.ietf.org/html/rfc2822#appendix-A.6.2
        s.truncate(s.len() - "GMT".len());
        s.push_str("+0000");
    }
    s
}

#[cfg(test)]
mod test {
    use std::time::{Duration, SystemTime};

    use pretty_assertions::assert_eq;

    use super::format_date;

    #[test]
    fn format_date_numeric_zone() {
        // Tue, 15 Nov 1994 08:12:31 GMT
        assert_eq!(
            format_date(SystemTime::UNIX_EPOCH + Duration::from_secs(784887151)),
            "Tue, 15 Nov 1994 08:12:31 +0000"
        );
        assert_eq!(
            format_date(SystemTime::UNIX_EPOCH + Duration::from_secs(784887152)),
            "Tue, 15 Nov 1994 08:12:32 +0000"
        );
    }

    #[test]
    fn before_epoch_is_clamped() {
        assert_eq!(
            format_date(SystemTime::UNIX_EPOCH - Duration::from_secs(10)),
            "Thu, 01 Jan 1970 00:00:00 +0000"
        );
    }
}
