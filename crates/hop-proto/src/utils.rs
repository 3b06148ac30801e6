use core::str::{FromStr, from_utf8};

pub(crate) trait HeaderLookup {
    fn headers(&self) -> &[httparse::Header<'_>];

    /// Returns the value of the header, or `Err(())` when it is present more than once.
    fn unique_header_value(&self, header_name: &str) -> Result<Option<&str>, ()> {
        let mut values = self
            .headers()
            .iter()
            .filter(|header| header.name.eq_ignore_ascii_case(header_name))
            .map(|header| from_utf8(header.value).map(str::trim));

        let first = values.next();

        if values.next().is_some() {
            return Err(());
        }

        match first {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(_)) => Err(()),
            None => Ok(None),
        }
    }
}

impl HeaderLookup for httparse::Request<'_, '_> {
    fn headers(&self) -> &[httparse::Header<'_>] {
        self.headers
    }
}

impl HeaderLookup for httparse::Response<'_, '_> {
    fn headers(&self) -> &[httparse::Header<'_>] {
        self.headers
    }
}

/// Strict decimal parsing: digits only, no sign, no surrounding whitespace.
pub(crate) fn parse_decimal<T: FromStr>(value: &str) -> Option<T> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    value.parse().ok()
}
