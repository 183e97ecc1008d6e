use std::borrow::Cow;

/// Escape a filter literal.
///
/// Literal values appearing in an LDAP filter can contain any character,
/// but some characters (parentheses, asterisk, backslash, NUL) must be
/// escaped in the filter's string representation. This function does the
/// escaping.
///
/// The argument, `lit`, can be owned or borrowed. The function doesn't
/// allocate the return value unless there's need to escape the input.
pub fn ldap_escape<'a, S: Into<Cow<'a, str>>>(lit: S) -> Cow<'a, str> {
    #[inline]
    fn needs_escape(c: u8) -> bool {
        matches!(c, b'\\' | b'*' | b'(' | b')' | 0)
    }

    let lit = lit.into();
    let first = match lit.bytes().position(needs_escape) {
        Some(pos) => pos,
        None => return lit,
    };
    let mut output = String::with_capacity(lit.len() + 12); // guess: up to 4 escaped chars
    output.push_str(&lit[..first]);
    for ch in lit[first..].chars() {
        if ch.is_ascii() && needs_escape(ch as u8) {
            let c = ch as u8;
            output.push('\\');
            output.push(char::from_digit(u32::from(c >> 4), 16).expect("hex digit"));
            output.push(char::from_digit(u32::from(c & 0xf), 16).expect("hex digit"));
        } else {
            output.push(ch);
        }
    }
    Cow::Owned(output)
}

#[cfg(test)]
mod test {
    use super::ldap_escape;
    use std::borrow::Cow;

    #[test]
    fn escape_specials() {
        assert_eq!(ldap_escape("a*(b)\\c"), "a\\2a\\28b\\29\\5cc");
    }

    #[test]
    fn escape_passthrough() {
        assert!(matches!(ldap_escape("südo"), Cow::Borrowed(_)));
    }
}
