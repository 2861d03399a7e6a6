/// Words masked out of every stored message.
const BANNED: [&str; 4] = ["fuck", "shit", "bitch", "asshole"];

/// Replace each case-insensitive occurrence of a banned word with `*` of the
/// same length. Output has as many chars as the input, and masking an
/// already-masked string changes nothing.
pub fn mask(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        match BANNED.iter().find(|word| matches_at(&chars[i..], word)) {
            Some(word) => {
                let len = word.chars().count();
                out.extend(std::iter::repeat_n('*', len));
                i += len;
            }
            None => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }

    out
}

fn matches_at(haystack: &[char], word: &str) -> bool {
    let mut rest = haystack.iter();
    word.chars()
        .all(|w| rest.next().is_some_and(|c| c.to_ascii_lowercase() == w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_with_equal_length() {
        assert_eq!(mask("you fuck idiot"), "you **** idiot");
        assert_eq!(mask("SHITshit"), "********");
        assert_eq!(mask("what an AssHole!"), "what an *******!");
    }

    #[test]
    fn test_leaves_clean_text_alone() {
        assert_eq!(mask("feeling better today"), "feeling better today");
        assert_eq!(mask(""), "");
        assert_eq!(mask("fuc"), "fuc");
    }

    #[test]
    fn test_idempotent_and_length_preserving() {
        let samples = [
            "you fuck idiot",
            "bitchbitch",
            "naïve shit café",
            "***",
            "ShItFuCk asshole",
            "日本語 fuck",
        ];
        for sample in samples {
            let once = mask(sample);
            assert_eq!(mask(&once), once, "not idempotent for {:?}", sample);
            assert_eq!(once.chars().count(), sample.chars().count());
        }
    }
}
