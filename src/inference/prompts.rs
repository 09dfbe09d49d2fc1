//! Prompt builders for the two analysis stages.

/// Stage-1 prompt: condense a screen recording into 3-5 observation
/// segments. `duration` is the recording length as `MM:SS`; all timestamps
/// in the reply must fall inside it.
pub fn transcription_prompt(duration: &str) -> String {
    format!(
        r#"Your job is to transcribe someone's computer usage into a small number of meaningful activity segments.

CRITICAL: This video is exactly {duration} long. ALL timestamps MUST be within 00:00 to {duration}.

Golden rule: aim for 3-5 segments per 15-minute video (fewer is better than more).

Core principles:
1. Group by purpose, not by platform - planning a trip across five websites is ONE segment.
2. Include interruptions in the description - do not create segments for brief distractions.
3. Only split when context changes for 2-3+ minutes - quick checks are not context switches.
4. Think in terms of sessions - what would you tell a friend you spent the time doing?
5. If the screen stays identical for 5+ minutes, note that the user was idle during that period but still describe what is on screen.

Return ONLY a JSON array with this exact structure:
[
  {{
    "startTimestamp": "MM:SS",
    "endTimestamp": "MM:SS",
    "description": "1-3 sentences describing what the user accomplished"
  }}
]"#
    )
}

/// Stage-2 prompt: synthesize observations into timeline cards. The
/// category list is a closed set; the parser folds anything else into 其他.
pub fn activity_cards_prompt(observations_text: &str, existing_cards_json: &str) -> String {
    format!(
        r#"You are a digital anthropologist observing a user's raw activity log. Synthesize the log into a high-level, human-readable story of the session, presented as timeline cards.

THE GOLDEN RULE: create cards that narrate one cohesive session, aiming for 15-60 minutes each. Keep every card at least 10 minutes; if a prospective card would be shorter, merge it into the neighboring card that preserves the best story.

CONTINUITY RULE: you may adjust boundaries for clarity, but never introduce new gaps or overlaps. Preserve any original gaps in the source timeline.

TITLE: 2-5 words with an action verb ("Writing Python documentation", not "Computer work").

SUMMARY: 1-2 sentences (max 150 characters) describing the main accomplishment, past tense.

CATEGORY: choose exactly one, returned exactly as written:
- "工作" (Work) - professional tasks, coding, writing, meetings, email
- "学习" (Learning) - courses, tutorials, reading documentation, studying
- "娱乐" (Entertainment) - videos, games, social media browsing
- "其他" (Other) - everything else

DETAILED SUMMARY: 2-4 sentences (max 500 characters) with specific tools, sites and applications, notable accomplishments or blockers.

INPUTS:
Previous cards: {existing_cards_json}
New observations:
{observations_text}

Return ONLY a JSON array with this exact structure:
[
  {{
    "startTime": "1:12 PM",
    "endTime": "1:30 PM",
    "category": "工作",
    "title": "...",
    "summary": "...",
    "detailedSummary": "..."
  }}
]"#
    )
}

/// Format a duration in seconds as the `MM:SS` string the stage-1 prompt
/// and parser share.
pub fn format_offset(total_secs: i64) -> String {
    let secs = total_secs.max(0);
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_formatting_pads_both_fields() {
        assert_eq!(format_offset(0), "00:00");
        assert_eq!(format_offset(65), "01:05");
        assert_eq!(format_offset(900), "15:00");
        assert_eq!(format_offset(-5), "00:00");
    }

    #[test]
    fn transcription_prompt_embeds_duration() {
        let prompt = transcription_prompt("15:00");
        assert!(prompt.contains("exactly 15:00 long"));
    }
}
