// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::borrow::Cow;
use std::fmt;

/// A backtick-quoted MySQL identifier, with embedded backticks doubled.
pub struct QuotedIdent<'a>(&'a str);

impl<'a> fmt::Display for QuotedIdent<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("`")?;
        for c in self.0.chars() {
            if c == '`' {
                f.write_str("``")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        f.write_str("`")
    }
}

pub fn quote_ident(s: &str) -> QuotedIdent<'_> {
    QuotedIdent(s)
}

/// Strip one pair of surrounding backticks and undo doubled backticks.
///
/// Unquoted input is returned as is. Invalid UTF-8 is replaced, names are
/// only used for file paths and re-quoting.
pub fn unquote_ident(raw: &[u8]) -> Cow<'_, str> {
    let inner = match raw {
        [b'`', inner @ .., b'`'] => inner,
        _ => trim_backticks(raw),
    };
    let name = String::from_utf8_lossy(inner);
    if name.contains("``") {
        Cow::Owned(name.replace("``", "`"))
    } else {
        name
    }
}

fn trim_backticks(raw: &[u8]) -> &[u8] {
    let start = raw.iter().position(|b| *b != b'`').unwrap_or(raw.len());
    let end = raw.iter().rposition(|b| *b != b'`').map_or(start, |i| i + 1);
    &raw[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_doubles_backticks() {
        assert_eq!(quote_ident("users").to_string(), "`users`");
        assert_eq!(quote_ident("we`ird").to_string(), "`we``ird`");
    }

    #[test]
    fn unquoting() {
        assert_eq!(unquote_ident(b"`users`"), "users");
        assert_eq!(unquote_ident(b"users"), "users");
        assert_eq!(unquote_ident(b"`we``ird`"), "we`ird");
        assert_eq!(unquote_ident(b"`half"), "half");
        assert_eq!(unquote_ident(b"``"), "");
    }
}
