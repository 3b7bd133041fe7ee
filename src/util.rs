//! Small utility helpers used across modules.

/// Character count of a line. Poem lines are compared by characters, never bytes.
pub fn char_len(s: &str) -> usize {
  s.chars().count()
}

/// Format a play duration as `M分SS秒` (minutes unpadded, seconds two digits).
/// Negative durations clamp to zero.
pub fn format_play_time(millis: i64) -> String {
  let seconds = millis.max(0) / 1000;
  let minutes = seconds / 60;
  format!("{}分{:02}秒", minutes, seconds % 60)
}

/// Integer percentage, rounded half up; 0 when there were no attempts.
pub fn accuracy_percent(correct: u32, total: u32) -> u32 {
  if total == 0 {
    return 0;
  }
  ((correct as f64 / total as f64) * 100.0).round() as u32
}

/// Log-safe truncation for user-supplied text.
/// Avoids spamming logs with whole feedback messages.
pub fn trunc_for_log(s: &str, max_chars: usize) -> String {
  let total = char_len(s);
  if total <= max_chars {
    s.to_string()
  } else {
    let head: String = s.chars().take(max_chars).collect();
    format!("{}… ({} chars total)", head, total)
  }
}
