//! Label trie for matching query names against configured patterns.

#[derive(Debug, Clone, Default)]
struct Node {
    label: Box<str>,
    /// A `*.` pattern ends here; everything strictly below matches.
    below: bool,
    exact: bool,
    children: Vec<Node>,
}

impl Node {
    fn new(label: &str) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    fn child_mut(&mut self, label: &str) -> &mut Node {
        match self.children.binary_search_by(|n| n.label.as_ref().cmp(label)) {
            Ok(i) => &mut self.children[i],
            Err(i) => {
                self.children.insert(i, Node::new(label));
                &mut self.children[i]
            }
        }
    }

    fn child(&self, label: &str) -> Option<&Node> {
        self.children
            .binary_search_by(|n| n.label.as_ref().cmp(label))
            .ok()
            .map(|i| &self.children[i])
    }
}

/// Matches names against `name` and `*.name` patterns, ignoring case and trailing dots.
#[derive(Debug, Clone, Default)]
pub struct NameMatcher {
    root: Node,
    len: usize,
}

impl NameMatcher {
    pub fn load<'a, I>(patterns: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut matcher = Self::default();
        for pattern in patterns {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }

            let (below, name) = match pattern.strip_prefix("*.") {
                Some(rest) => (true, rest),
                None => (false, pattern),
            };
            let labels = reversed_labels(name)?;
            if labels.is_empty() {
                anyhow::bail!("pattern matches the root: {}", pattern);
            }

            let mut node = &mut matcher.root;
            for label in &labels {
                node = node.child_mut(label);
            }
            if below {
                node.below = true;
            } else {
                node.exact = true;
            }
            matcher.len += 1;
        }
        Ok(matcher)
    }

    pub fn is_match(&self, name: &str) -> bool {
        let Ok(labels) = reversed_labels(name) else {
            return false;
        };

        let mut node = &self.root;
        for label in &labels {
            if node.below {
                return true;
            }
            match node.child(label) {
                Some(next) => node = next,
                None => return false,
            }
        }
        node.exact
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// "WWW.Example.COM." -> ["com", "example", "www"]
fn reversed_labels(input: &str) -> anyhow::Result<Vec<String>> {
    let s = input.trim().trim_end_matches('.').to_ascii_lowercase();
    let ascii = idna::domain_to_ascii(&s).map_err(|_| anyhow::anyhow!("invalid domain: {}", input))?;

    let mut labels: Vec<String> = ascii.split('.').filter(|l| !l.is_empty()).map(String::from).collect();
    labels.reverse();
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_wildcard() {
        let matcher = NameMatcher::load(["ads.example.com", "*.tracker.example", ""]).unwrap();
        assert_eq!(matcher.len(), 2);

        assert!(matcher.is_match("ads.example.com"));
        assert!(matcher.is_match("ADS.Example.com."));
        assert!(!matcher.is_match("www.ads.example.com"));
        assert!(!matcher.is_match("example.com"));

        assert!(matcher.is_match("a.tracker.example"));
        assert!(matcher.is_match("a.b.tracker.example."));
        assert!(!matcher.is_match("tracker.example"));
    }

    #[test]
    fn test_unicode_patterns() {
        let matcher = NameMatcher::load(["bücher.example"]).unwrap();
        assert!(matcher.is_match("xn--bcher-kva.example."));
    }

    #[test]
    fn test_rejects_root() {
        assert!(NameMatcher::load(["."]).is_err());
        assert!(NameMatcher::default().is_empty());
        assert!(!NameMatcher::default().is_match("example.com"));
    }
}
