use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("expected at least {expected} fields but found {found} in {line:?}")]
pub struct FieldCountError {
    pub(crate) line: String,
    pub(crate) expected: usize,
    pub(crate) found: usize,
}

/// Split a protocol line into its `|`-separated fields.
///
/// Splitting is purely positional: a caller that treats the tail of the
/// line as one logical field must put it back together with [`join`],
/// because the payload of events like `data-line` may itself contain `|`.
pub fn split(line: &str) -> Vec<&str> {
    line.split('|').collect()
}

/// Split a line and require a minimum number of fields.
pub fn split_min(line: &str, expected: usize) -> Result<Vec<&str>, FieldCountError> {
    let fields = split(line);
    if fields.len() < expected {
        return Err(FieldCountError {
            line: line.to_string(),
            expected,
            found: fields.len(),
        });
    }
    Ok(fields)
}

/// Join fields into one `|`-separated line body. No escaping is applied;
/// fields must not contain newlines.
pub fn join(fields: &[&str]) -> String {
    fields.join("|")
}
