//! Message rendering for returned capsules.
//!
//! Pairs each stored answer with the sealing prompt it answered and formats
//! the per-channel bodies. Legacy single-belief capsules arrive here already
//! normalized to a one-element answer sequence.

/// The sealing prompts, in the order answers are stored.
pub const QUESTIONS: [&str; 3] = [
    "What do you believe to be true right now?",
    "What are you most uncertain about?",
    "What would have to happen for that uncertainty to resolve?",
];

/// Pair answers with their prompts. Answers beyond the known prompts get a
/// generic "Question N" label rather than being dropped.
pub fn format_answers(answers: &[String]) -> Vec<(String, String)> {
    answers
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let question = QUESTIONS
                .get(i)
                .map(|q| (*q).to_string())
                .unwrap_or_else(|| format!("Question {}", i + 1));
            (question, a.clone())
        })
        .collect()
}

pub fn email_subject(interval: &str) -> String {
    format!("Thoughts you sealed {interval} ago")
}

pub fn email_text(interval: &str, answers: &[String]) -> String {
    let body = format_answers(answers)
        .iter()
        .map(|(q, a)| format!("{q}\n\"{a}\""))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{interval} ago, you sealed these thoughts:\n\n{body}\n\n\u{2014}TimeCap")
}

pub fn email_html(interval: &str, answers: &[String]) -> String {
    let blocks = format_answers(answers)
        .iter()
        .map(|(q, a)| {
            format!(
                r#"
      <p style="color: #888; font-size: 0.85rem; margin-bottom: 0.25rem;">{q}</p>
      <blockquote style="font-size: 1.1rem; font-style: italic; color: #222; border-left: 2px solid #c8b89a; padding-left: 1rem; margin: 0 0 1.5rem 0;">
        {a}
      </blockquote>"#
            )
        })
        .collect::<String>();

    format!(
        r#"
      <div style="font-family: Georgia, serif; max-width: 480px; margin: 0 auto; padding: 2rem; color: #333;">
        <p style="color: #888; font-size: 0.9rem; margin-bottom: 1.5rem;">{interval} ago, you sealed these thoughts:</p>
        {blocks}
        <p style="color: #999; font-size: 0.85rem; margin-top: 2rem;">&mdash;TimeCap</p>
      </div>
    "#
    )
}

pub fn sms_body(interval: &str, answers: &[String]) -> String {
    let quoted = format_answers(answers)
        .iter()
        .map(|(_, a)| format!("\"{a}\""))
        .collect::<Vec<_>>()
        .join(" \u{2022} ");
    format!("TimeCap: {interval} ago, you sealed: {quoted}")
}

/// JSON payload shown by the service worker notification.
pub fn push_payload(capsule_id: &str, interval: &str) -> String {
    serde_json::json!({
        "title": "TimeCap",
        "body": format!("Thoughts you sealed {interval} ago have returned."),
        "capsuleId": capsule_id,
    })
    .to_string()
}
