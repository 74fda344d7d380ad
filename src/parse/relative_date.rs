use chrono::{Datelike, Days, NaiveDate, Weekday};

/// Resolve a `$word` relative date (without the `$`) against `today`.
/// Returns `None` for words outside the vocabulary.
pub fn resolve_relative_date(word: &str, today: NaiveDate) -> Option<NaiveDate> {
    let word = word.to_ascii_lowercase();
    let offset = match word.as_str() {
        "today" | "tod" => 0,
        "tomorrow" | "tom" => 1,
        "week" => 7,
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        other => days_until(weekday_from_word(other)?, today),
    };
    today.checked_add_days(Days::new(offset))
}

/// Days until the next `target`, strictly after `today`
fn days_until(target: Weekday, today: NaiveDate) -> u64 {
    let from = today.weekday().num_days_from_monday();
    let to = target.num_days_from_monday();
    match (7 + to - from) % 7 {
        0 => 7,
        n => u64::from(n),
    }
}

fn weekday_from_word(word: &str) -> Option<Weekday> {
    let day = match word {
        "monday" | "mon" => Weekday::Mon,
        "tuesday" | "tue" => Weekday::Tue,
        "wednesday" | "wed" => Weekday::Wed,
        "thursday" | "thu" => Weekday::Thu,
        "friday" | "fri" => Weekday::Fri,
        "saturday" | "sat" => Weekday::Sat,
        "sunday" | "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(day)
}
