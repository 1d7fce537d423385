//! Natural ordering shared by metric lists and label lists.

use std::cmp::Ordering;

/// Natural, case-insensitive ordering: digit runs compare by numeric value,
/// so `"m2"` sorts before `"m10"`. Ties fall back to the raw strings.
pub fn alpha_numeric_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let ln = take_digits(&mut left);
                let rn = take_digits(&mut right);
                let ord = cmp_digit_runs(&ln, &rn);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(l), Some(r)) => {
                let ord = l.to_lowercase().cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        chars.next();
    }
    run
}

/// Compare two digit runs numerically without overflowing on long runs.
fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_runs() {
        let mut names = vec!["m10", "m2", "M1", "loss", "acc"];
        names.sort_by(|a, b| alpha_numeric_cmp(a, b));
        assert_eq!(names, vec!["acc", "loss", "M1", "m2", "m10"]);
    }

    #[test]
    fn test_prefix_sorts_first() {
        assert_eq!(alpha_numeric_cmp("loss", "loss_val"), Ordering::Less);
        assert_eq!(alpha_numeric_cmp("a", "a"), Ordering::Equal);
    }

    #[test]
    fn test_long_digit_runs() {
        assert_eq!(
            alpha_numeric_cmp("run99999999999999999999", "run100000000000000000000"),
            Ordering::Less
        );
    }
}
