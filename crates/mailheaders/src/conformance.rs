use std::fmt;
use std::str::FromStr;

bitflags::bitflags! {
    /// Deviations from RFC 5322 noticed while loading a header field.
    /// None of these prevent the field from being loaded.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct FieldConformance: u8 {
        const NON_CANONICAL_LINE_ENDINGS = 0b0000_0001;
        const NAME_ENDS_WITH_SPACE = 0b0000_0010;
        const LINE_TOO_LONG = 0b0000_0100;
        const NON_UTF8 = 0b0000_1000;
    }
}

impl FromStr for FieldConformance {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        let mut result = Self::default();
        for ele in s.split('|') {
            if ele.is_empty() {
                continue;
            }
            match Self::from_name(ele) {
                Some(v) => {
                    result = result.union(v);
                }
                None => {
                    let mut possible: Vec<String> = Self::all()
                        .iter_names()
                        .map(|(name, _)| format!("'{name}'"))
                        .collect();
                    possible.sort();
                    let possible = possible.join(", ");
                    return Err(format!(
                        "invalid FieldConformance flag '{ele}', possible values are {possible}"
                    ));
                }
            }
        }
        Ok(result)
    }
}

impl fmt::Display for FieldConformance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        names.sort();
        write!(f, "{}", names.join("|"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use k9::assert_equal;

    #[test]
    fn conformance_string() {
        let flags = FieldConformance::LINE_TOO_LONG | FieldConformance::NON_UTF8;
        assert_equal!(flags.to_string(), "LINE_TOO_LONG|NON_UTF8");
        assert_equal!(
            "NON_UTF8|LINE_TOO_LONG".parse::<FieldConformance>().unwrap(),
            flags
        );
        assert_equal!(
            "".parse::<FieldConformance>().unwrap(),
            FieldConformance::default()
        );
        assert_equal!(
            "BOGUS".parse::<FieldConformance>().unwrap_err(),
            "invalid FieldConformance flag 'BOGUS', possible values are 'LINE_TOO_LONG', 'NAME_ENDS_WITH_SPACE', 'NON_CANONICAL_LINE_ENDINGS', 'NON_UTF8'"
        );
    }
}
