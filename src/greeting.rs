use chrono::{Local, Timelike};
use rand::seq::SliceRandom;

const ANYTIME: &[&str] = &[
    "Thanks for calling {business}, how can I help you today?",
    "You've reached {business}. What can I do for you?",
    "Hello, this is {business}. How may I help?",
];

const MORNING: &[&str] = &[
    "Good morning, thanks for calling {business}. How can I help?",
    "Morning! You've reached {business}. What can I do for you?",
];

const AFTERNOON: &[&str] = &[
    "Good afternoon, thanks for calling {business}. How can I help?",
    "Good afternoon, you've reached {business}. What can I do for you?",
];

const EVENING: &[&str] = &[
    "Good evening, thanks for calling {business}. How can I help?",
    "Good evening, you've reached {business}. What can I do for you?",
];

fn time_pool(hour: u32) -> &'static [&'static str] {
    match hour {
        5..=11 => MORNING,
        12..=16 => AFTERNOON,
        17..=21 => EVENING,
        _ => ANYTIME,
    }
}

/// Select a fallback greeting for tenants with no configured greeting.
///
/// Combines anytime greetings with time-specific ones and picks randomly.
/// The `{business}` placeholder is replaced with the tenant's name.
pub fn select_greeting(business: &str) -> String {
    let hour = Local::now().hour();
    select_greeting_for_hour(business, hour)
}

fn select_greeting_for_hour(business: &str, hour: u32) -> String {
    let time_specific = time_pool(hour);
    let mut pool: Vec<&str> = Vec::with_capacity(ANYTIME.len() + time_specific.len());
    pool.extend_from_slice(ANYTIME);
    pool.extend_from_slice(time_specific);

    let mut rng = rand::thread_rng();
    let template = pool.choose(&mut rng).unwrap_or(&ANYTIME[0]);
    template.replace("{business}", business)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_contains_business_name() {
        let greeting = select_greeting_for_hour("Acme HVAC", 10);
        assert!(
            greeting.contains("Acme HVAC"),
            "greeting should contain business name: {greeting}"
        );
    }

    #[test]
    fn greeting_no_placeholder_leftover() {
        for hour in 0..24 {
            let greeting = select_greeting_for_hour("Roof Right", hour);
            assert!(
                !greeting.contains("{business}"),
                "placeholder not replaced at hour {hour}: {greeting}"
            );
        }
    }

    #[test]
    fn greeting_never_empty() {
        for hour in 0..24 {
            let greeting = select_greeting_for_hour("X", hour);
            assert!(!greeting.is_empty(), "empty greeting at hour {hour}");
        }
    }

    #[test]
    fn time_pool_boundaries() {
        assert_eq!(time_pool(4), ANYTIME);
        assert_eq!(time_pool(5), MORNING);
        assert_eq!(time_pool(11), MORNING);
        assert_eq!(time_pool(12), AFTERNOON);
        assert_eq!(time_pool(16), AFTERNOON);
        assert_eq!(time_pool(17), EVENING);
        assert_eq!(time_pool(21), EVENING);
        assert_eq!(time_pool(22), ANYTIME);
    }
}
