//! Built-in text-processing tools.
//!
//! Small pure functions over strings, exposed through [`builtin_registry`].

use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use super::{
    ParamSpec, ParamType, RegistryError, ToolArgs, ToolDescriptor, ToolError, ToolRegistry,
    ToolResult,
};

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4}").expect("date pattern is valid")
});
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.-]+@[\w.-]+\.\w+$").expect("email pattern is valid"));
static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\w+").expect("hashtag pattern is valid"));
static SLUG_STRIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w-]").expect("slug pattern is valid"));

const SLUG_MAX_CHARS: usize = 60;
const MIN_PASSWORD_CHARS: usize = 8;
const DEFAULT_WPM: i64 = 200;

const POSITIVE_WORDS: &[&str] = &["good", "great", "excellent", "happy"];
const NEGATIVE_WORDS: &[&str] = &["bad", "poor", "terrible", "sad"];

fn find_all(re: &Regex, text: &str) -> Vec<String> {
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

/// Finds ISO (`2023-12-25`) and slash (`12/31/2023`) dates in order of appearance.
#[must_use]
pub fn extract_dates(text: &str) -> Vec<String> {
    find_all(&DATE_RE, text)
}

/// Checks that an address looks like `local@domain.tld`.
#[must_use]
pub fn validate_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Lowercases, hyphenates and strips a title into a URL slug of at most
/// 60 characters.
///
/// The strip step is a regex, not a literal substring replace: everything
/// other than word characters and `-` is removed, so `"Post 2023!"` becomes
/// `"post-2023"` rather than keeping the trailing `!`.
#[must_use]
pub fn generate_slug(text: &str) -> String {
    let hyphenated = text.trim().to_lowercase().replace(' ', "-");
    SLUG_STRIP_RE
        .replace_all(&hyphenated, "")
        .chars()
        .take(SLUG_MAX_CHARS)
        .collect()
}

/// At least 8 characters with an uppercase letter and an ASCII digit.
#[must_use]
pub fn check_password_strength(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_CHARS
        && password.chars().any(char::is_uppercase)
        && password.chars().any(|c| c.is_ascii_digit())
}

/// Capitalises every whitespace-separated part of a name.
#[must_use]
pub fn capitalize_names(name: &str) -> String {
    name.split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect()
    })
}

/// Finds `#tags` in order of appearance.
#[must_use]
pub fn extract_hashtags(text: &str) -> Vec<String> {
    find_all(&HASHTAG_RE, text)
}

/// Estimated reading time in whole minutes, never less than one.
///
/// Halves round to even.
///
/// # Errors
///
/// Fails when `wpm` is zero.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)] // counts stay below 2^52
pub fn calculate_reading_time(text: &str, wpm: i64) -> Result<i64, ToolError> {
    if wpm == 0 {
        return Err(ToolError::new("division by zero: wpm must not be 0"));
    }

    let words = text.split_whitespace().count() as f64;
    let minutes = (words / wpm as f64).round_ties_even() as i64;
    Ok(minutes.max(1))
}

/// Positive minus negative keyword count.
#[must_use]
pub fn basic_sentiment(text: &str) -> i64 {
    let lowered = text.to_lowercase();
    lowered
        .split_whitespace()
        .map(|word| {
            if POSITIVE_WORDS.contains(&word) {
                1
            } else if NEGATIVE_WORDS.contains(&word) {
                -1
            } else {
                0
            }
        })
        .sum()
}

fn text_param(name: &str, description: &str) -> ParamSpec {
    ParamSpec::required(name, ParamType::String, description)
}

/// Builds the registry holding every built-in tool, in advertisement order.
///
/// # Errors
///
/// Returns [`RegistryError::DuplicateName`] if two built-ins share a name.
pub fn builtin_registry() -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();

    registry.register(
        ToolDescriptor::new(
            "extract_dates",
            "Takes a string text (source to scan) as input. Find date-like patterns using simple regex",
        )
        .param(text_param("text", "Source to scan")),
        |args: &ToolArgs| Ok(ToolResult::List(extract_dates(args.str("text")?))),
    )?;

    registry.register(
        ToolDescriptor::new(
            "validate_email",
            "Takes a string email (address to verify) as input. Check valid email format",
        )
        .param(text_param("email", "Address to verify")),
        |args: &ToolArgs| Ok(ToolResult::Boolean(validate_email(args.str("email")?))),
    )?;

    registry.register(
        ToolDescriptor::new(
            "generate_slug",
            "Takes string text (content to convert) as input. Create URL-friendly slug",
        )
        .param(text_param("text", "Content to convert")),
        |args: &ToolArgs| Ok(ToolResult::Text(generate_slug(args.str("text")?))),
    )?;

    registry.register(
        ToolDescriptor::new(
            "check_password_strength",
            "Takes string password (text to evaluate) as input. Verify basic security criteria",
        )
        .param(text_param("password", "Text to evaluate")),
        |args: &ToolArgs| Ok(ToolResult::Boolean(check_password_strength(args.str("password")?))),
    )?;

    registry.register(
        ToolDescriptor::new(
            "capitalize_names",
            "Takes string name (full name input) as input. Format personal names properly",
        )
        .param(text_param("name", "Full name input")),
        |args: &ToolArgs| Ok(ToolResult::Text(capitalize_names(args.str("name")?))),
    )?;

    registry.register(
        ToolDescriptor::new(
            "extract_hashtags",
            "Takes string text (social content) as input. Identify social media hashtags",
        )
        .param(text_param("text", "Social content")),
        |args: &ToolArgs| Ok(ToolResult::List(extract_hashtags(args.str("text")?))),
    )?;

    registry.register(
        ToolDescriptor::new(
            "calculate_reading_time",
            "Takes string text (content to measure) and optional wpm (words per minute). Estimate reading duration",
        )
        .param(text_param("text", "Content to measure"))
        .param(ParamSpec::optional(
            "wpm",
            ParamType::Integer,
            "Words per minute",
            json!(DEFAULT_WPM),
        )),
        |args: &ToolArgs| {
            calculate_reading_time(args.str("text")?, args.int("wpm")?).map(ToolResult::Integer)
        },
    )?;

    registry.register(
        ToolDescriptor::new(
            "basic_sentiment",
            "Takes string text (content to analyze) as input. Simple positive/negative word score",
        )
        .param(text_param("text", "Content to analyze")),
        |args: &ToolArgs| Ok(ToolResult::Integer(basic_sentiment(args.str("text")?))),
    )?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_patterns_compile() {
        for re in [&DATE_RE, &EMAIL_RE, &HASHTAG_RE, &SLUG_STRIP_RE] {
            assert!(!LazyLock::force(re).as_str().is_empty());
        }
    }

    #[test]
    fn dates_in_both_formats() {
        assert_eq!(
            extract_dates("Meeting on 2023-12-25 or 12/31/2023"),
            ["2023-12-25", "12/31/2023"]
        );
        assert!(extract_dates("no dates here").is_empty());
    }

    #[test]
    fn email_validation() {
        assert!(validate_email("user.name@example.com"));
        assert!(!validate_email("not-an-email"));
        assert!(!validate_email("a@b"));
    }

    #[test]
    fn slug_generation() {
        assert_eq!(
            generate_slug("My Awesome Blog Post 2023!"),
            "my-awesome-blog-post-2023"
        );
        let long = "word ".repeat(30);
        assert_eq!(generate_slug(&long).chars().count(), SLUG_MAX_CHARS);
        assert_eq!(generate_slug("  C'est la vie!  "), "cest-la-vie");
    }

    #[test]
    fn password_strength() {
        assert!(check_password_strength("SecurePass123"));
        assert!(!check_password_strength("weak"));
        assert!(!check_password_strength("alllowercase123"));
        assert!(!check_password_strength("NoDigitsHere"));
        // Non-ASCII numerals are not digits
        assert!(!check_password_strength("Abcdefgh½"));
        assert!(!check_password_strength("Abcdefgh\u{2167}"));
        assert!(!check_password_strength("Abcdefgh\u{0663}"));
    }

    #[test]
    fn name_capitalisation() {
        assert_eq!(capitalize_names("jane austin"), "Jane Austin");
        assert_eq!(capitalize_names("  mARY   o'neil "), "Mary O'neil");
        assert_eq!(capitalize_names(""), "");
    }

    #[test]
    fn hashtags() {
        assert_eq!(
            extract_hashtags("Loving #Python and #MachineLearning"),
            ["#Python", "#MachineLearning"]
        );
    }

    #[test]
    fn reading_time() {
        let article = "This is a sample article. ".repeat(100);
        assert_eq!(calculate_reading_time(&article, 200).unwrap(), 2);
        assert_eq!(calculate_reading_time("short", 200).unwrap(), 1);
        // 3.5 minutes rounds to the even neighbour
        assert_eq!(calculate_reading_time(&"w ".repeat(700), 200).unwrap(), 4);
        assert!(calculate_reading_time("text", 0).is_err());
    }

    #[test]
    fn sentiment_score() {
        assert_eq!(basic_sentiment("Great experience but poor customer service"), 0);
        assert_eq!(basic_sentiment("good GOOD happy sad"), 2);
    }

    #[test]
    fn registry_contains_all_tools_in_order() {
        let registry = builtin_registry().unwrap();
        let names: Vec<_> = registry.list().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "extract_dates",
                "validate_email",
                "generate_slug",
                "check_password_strength",
                "capitalize_names",
                "extract_hashtags",
                "calculate_reading_time",
                "basic_sentiment",
            ]
        );
    }

    #[test]
    fn registered_handlers_use_validated_args() {
        let registry = builtin_registry().unwrap();
        let tool = registry.lookup("calculate_reading_time").unwrap();
        let args = tool
            .descriptor
            .validate(&json!({"text": "one two three"}))
            .unwrap();
        assert_eq!((tool.handler)(&args).unwrap(), ToolResult::Integer(1));
    }
}
