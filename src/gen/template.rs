//! The runtime-support template.
//!
//! Generated programs share a runtime: the scheduler, the port buffers,
//! and the conversion routines. The runtime lives in a template file cut
//! into sections by marker lines of the form `//*X`, where `X` is a
//! single uppercase letter; the emitter copies sections between pieces
//! of generated code. The first line of the template carries a decimal
//! version number that must match [`RUNTIME_VERSION`], so a compiler and
//! a runtime that disagree abort instead of producing garbage.

use indexmap::IndexMap;

use crate::diag::Fatal;

/// Version of the runtime template this compiler expects.
pub const RUNTIME_VERSION: &str = "3";

/// A parsed template: the version line plus named section fragments, in
/// file order.
#[derive(Debug, Clone)]
pub struct Template {
    version: String,
    sections: IndexMap<char, String>,
}

impl Template {
    /// Parse a template. The first line must contain the version digits;
    /// everything between one `//*X` marker and the next belongs to
    /// section `X`.
    pub fn parse(text: &str) -> Result<Self, Fatal> {
        let mut lines = text.lines();
        let first = lines
            .next()
            .ok_or_else(|| Fatal::Io("runtime template is empty".to_string()))?;
        let digits: String = first.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(Fatal::Io(
                "runtime template has no version number on its first line".to_string(),
            ));
        }

        let mut sections: IndexMap<char, String> = IndexMap::new();
        let mut current: Option<char> = None;
        for line in lines {
            if let Some(marker) = line.find("//*") {
                let name = line[marker + 3..].chars().next();
                if let Some(name) = name.filter(|c| c.is_ascii_uppercase()) {
                    current = Some(name);
                    sections.entry(name).or_default();
                    continue;
                }
            }
            if let Some(name) = current {
                let section = sections.entry(name).or_default();
                section.push_str(line);
                section.push('\n');
            }
        }
        Ok(Self {
            version: digits,
            sections,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Abort unless the template matches this compiler.
    pub fn check_version(&self) -> Result<(), Fatal> {
        if self.version == RUNTIME_VERSION {
            Ok(())
        } else {
            Err(Fatal::Io(format!(
                "incompatible runtime template: compiler version is {RUNTIME_VERSION}, \
                 template version is {}",
                self.version
            )))
        }
    }

    /// The content of one section, if present.
    pub fn section(&self, name: char) -> Option<&str> {
        self.sections.get(&name).map(String::as_str)
    }

    /// Names of all sections, in file order.
    pub fn section_names(&self) -> impl Iterator<Item = char> + '_ {
        self.sections.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
// runtime support, version 3
//*A
header line
//*B
scheduler line one
scheduler line two
//*C
footer
";

    #[test]
    fn sections_split_at_markers() {
        let template = Template::parse(SAMPLE).unwrap();
        assert_eq!(template.version(), "3");
        assert_eq!(template.section('A'), Some("header line\n"));
        assert_eq!(
            template.section('B'),
            Some("scheduler line one\nscheduler line two\n")
        );
        assert_eq!(template.section('C'), Some("footer\n"));
        assert_eq!(template.section('Z'), None);
        assert_eq!(template.section_names().collect::<Vec<_>>(), vec!['A', 'B', 'C']);
    }

    #[test]
    fn version_mismatch_is_fatal() {
        let template = Template::parse("// version 99\n//*A\nx\n").unwrap();
        assert!(template.check_version().is_err());
    }

    #[test]
    fn missing_version_is_fatal() {
        assert!(Template::parse("// no digits here\n//*A\n").is_err());
    }
}
