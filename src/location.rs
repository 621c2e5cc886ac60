use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    scheme: String,
    hostname: String,
    port: String,
    pathname: String,
    search: String,
    hash: String,
}

impl Location {
    pub(crate) fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let scheme_end = trimmed.find(':')?;
        let scheme = trimmed[..scheme_end].to_ascii_lowercase();
        if scheme.is_empty()
            || !scheme
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.')
            || !scheme.as_bytes()[0].is_ascii_alphabetic()
        {
            return None;
        }

        let rest = &trimmed[scheme_end + 1..];
        let rest = rest.strip_prefix("//")?;

        let authority_end = rest
            .find(|ch| ch == '/' || ch == '?' || ch == '#')
            .unwrap_or(rest.len());
        let authority = &rest[..authority_end];
        if authority.is_empty() {
            return None;
        }
        let (hostname, port) = match authority.rfind(':') {
            Some(pos) if authority[pos + 1..].bytes().all(|b| b.is_ascii_digit()) => {
                (&authority[..pos], &authority[pos + 1..])
            }
            _ => (authority, ""),
        };

        let tail = &rest[authority_end..];
        let hash_at = tail.find('#');
        let (before_hash, hash) = match hash_at {
            Some(pos) => (&tail[..pos], &tail[pos..]),
            None => (tail, ""),
        };
        let search_at = before_hash.find('?');
        let (raw_path, search) = match search_at {
            Some(pos) => (&before_hash[..pos], &before_hash[pos..]),
            None => (before_hash, ""),
        };
        let pathname = if raw_path.is_empty() { "/" } else { raw_path };

        Some(Self {
            scheme,
            hostname: hostname.to_ascii_lowercase(),
            port: port.to_string(),
            pathname: pathname.to_string(),
            search: search.to_string(),
            hash: hash.to_string(),
        })
    }

    pub fn protocol(&self) -> String {
        format!("{}:", self.scheme)
    }

    pub fn host(&self) -> String {
        if self.port.is_empty() {
            self.hostname.clone()
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }

    pub fn origin(&self) -> String {
        format!("{}//{}", self.protocol(), self.host())
    }

    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn href(&self) -> String {
        format!(
            "{}//{}{}{}{}",
            self.protocol(),
            self.host(),
            self.pathname,
            self.search,
            self.hash
        )
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.href())
    }
}
