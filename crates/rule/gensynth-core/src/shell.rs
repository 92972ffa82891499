//! Shell quoting for generated command text.

use std::borrow::Cow;

use crate::error::ErrorKind;

/// Quote `s` so a POSIX shell reads it back as a single word.
///
/// Words that need no quoting come back borrowed. Input containing a NUL
/// byte cannot be passed through a shell and is rejected.
pub fn shell_quote(s: &str) -> Result<Cow<'_, str>, ErrorKind> {
    shlex::try_quote(s).map_err(|e| ErrorKind::Unquotable(e.to_string()))
}
