//! Name substitution into the joke text.

/// Tokens in the joke that stand for the first name and surname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    pub name: String,
    pub surname: String,
}

impl Default for Placeholders {
    fn default() -> Self {
        Self {
            name: "Eduardo".to_string(),
            surname: "Panisset".to_string(),
        }
    }
}

/// Replace every occurrence of `token` in `text`.
pub fn substitute(text: &str, token: &str, replacement: &str) -> String {
    if token.is_empty() {
        return text.to_string();
    }
    text.replace(token, replacement)
}

/// Substitute the name first, then the surname, over the result.
pub fn compose_joke(joke: &str, name: &str, surname: &str, placeholders: &Placeholders) -> String {
    let named = substitute(joke, &placeholders.name, name);
    substitute(&named, &placeholders.surname, surname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_both_tokens() {
        let joke = compose_joke("Eduardo Panisset is tall", "Alice", "Smith", &Placeholders::default());
        assert_eq!(joke, "Alice Smith is tall");
    }

    #[test]
    fn replaces_every_occurrence() {
        let joke = compose_joke(
            "Eduardo Panisset's friends call him Eduardo.",
            "Bo",
            "Li",
            &Placeholders::default(),
        );
        assert_eq!(joke, "Bo Li's friends call him Bo.");
    }

    #[test]
    fn substitution_is_sequential() {
        // a first name equal to the surname token is rewritten by the second pass
        let joke = compose_joke("Eduardo Panisset", "Panisset", "Jones", &Placeholders::default());
        assert_eq!(joke, "Jones Jones");
    }

    #[test]
    fn text_without_tokens_is_unchanged() {
        assert_eq!(
            compose_joke("No names here.", "A", "B", &Placeholders::default()),
            "No names here."
        );
        assert_eq!(substitute("abc", "", "x"), "abc");
    }
}
