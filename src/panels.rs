//! Panel layout computation driven by typing state.
//!
//! Three panels: output (results), module (enrichment context), prompt
//! (input). Layouts always account for the full terminal height; changes are
//! published as `layout.update` events at high priority so redraws preempt
//! enrichment output.

use serde::Serialize;

use crate::events::{Event, EventBus, PRIORITY_LAYOUT};

/// Panel dimension. `min` rows are guaranteed; `max` bounds growth when set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dim {
    pub min: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u16>,
}

impl Dim {
    fn rows(min: u16) -> Self {
        Self { min, max: None }
    }
}

/// Computed layout. Invariant: the `min` fields sum to the terminal height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PanelLayout {
    pub output: Dim,
    pub module: Dim,
    pub prompt: Dim,
}

impl PanelLayout {
    pub fn total(&self) -> u16 {
        self.output.min + self.module.min + self.prompt.min
    }
}

/// Current rendered content sizes, in rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentSizes {
    pub output: u16,
    pub module: u16,
}

/// Compression floors, applied in the order output -> module -> prompt.
const FLOOR_OUTPUT: u16 = 3;
const FLOOR_MODULE: u16 = 2;
const FLOOR_PROMPT: u16 = 1;

/// Compute the layout for one frame.
pub fn compute_layout(
    terminal_height: u16,
    typing_active: bool,
    prompt_lines: u16,
    content: ContentSizes,
) -> PanelLayout {
    let height = terminal_height.max(FLOOR_OUTPUT + FLOOR_MODULE + FLOOR_PROMPT);

    let (output, module, prompt) = if typing_active {
        let prompt = (prompt_lines + 2).min(height / 2).max(1);
        let remainder = height - prompt;
        let output = remainder * 7 / 10;
        let module = remainder - output;
        (output, module, prompt)
    } else if content.output + content.module + 3 <= height {
        // Everything fits: content-sized panels, prompt gets 3, the slack
        // goes to the output panel.
        let prompt = 3;
        let output = content.output.max(FLOOR_OUTPUT);
        let module = content.module.max(FLOOR_MODULE);
        if output + module + prompt <= height {
            (output + (height - output - module - prompt), module, prompt)
        } else {
            fit(output, module, prompt, height)
        }
    } else {
        // Weighted 0.5 / 0.3 / 0.2; output and module round down, prompt
        // takes the leftover.
        let output = height / 2;
        let module = height * 3 / 10;
        let prompt = height - output - module;
        (output, module, prompt)
    };

    let (output, module, prompt) = fit(output, module, prompt, height);
    PanelLayout {
        output: Dim::rows(output),
        module: Dim::rows(module),
        prompt: Dim::rows(prompt),
    }
}

/// Force the three sizes to sum exactly to `height`, compressing in the
/// order output -> module -> prompt, each stopping at its floor (and only
/// going below a floor when every floor alone still exceeds the terminal).
fn fit(output: u16, module: u16, prompt: u16, height: u16) -> (u16, u16, u16) {
    let mut sizes = [output, module, prompt];
    let floors = [FLOOR_OUTPUT, FLOOR_MODULE, FLOOR_PROMPT];
    let total: u16 = sizes.iter().sum();

    if total > height {
        let mut excess = total - height;
        for i in 0..sizes.len() {
            let give = sizes[i].saturating_sub(floors[i]).min(excess);
            sizes[i] -= give;
            excess -= give;
            if excess == 0 {
                break;
            }
        }
        // Terminal smaller than the floors themselves: same order, down to 1.
        if excess > 0 {
            for size in &mut sizes {
                let give = size.saturating_sub(1).min(excess);
                *size -= give;
                excess -= give;
                if excess == 0 {
                    break;
                }
            }
        }
    } else if total < height {
        sizes[0] += height - total;
    }

    (sizes[0], sizes[1], sizes[2])
}

/// Stateful orchestrator: recomputes layouts and publishes changes.
pub struct PanelOrchestrator {
    bus: std::sync::Arc<EventBus>,
    last: std::sync::Mutex<Option<PanelLayout>>,
}

impl PanelOrchestrator {
    pub fn new(bus: std::sync::Arc<EventBus>) -> Self {
        Self {
            bus,
            last: std::sync::Mutex::new(None),
        }
    }

    /// Recompute; publish `layout.update` only when the layout changed.
    pub fn update(
        &self,
        terminal_height: u16,
        typing_active: bool,
        prompt_lines: u16,
        content: ContentSizes,
    ) -> PanelLayout {
        let layout = compute_layout(terminal_height, typing_active, prompt_lines, content);
        let mut last = self.last.lock().expect("layout state poisoned");
        if last.as_ref() != Some(&layout) {
            *last = Some(layout);
            let _ = self.bus.publish(Event::new(
                "layout.update",
                serde_json::to_value(layout).unwrap_or_default(),
                PRIORITY_LAYOUT,
            ));
        }
        layout
    }
}

/// Terminal height, defaulting when the query fails (e.g. not a tty).
pub fn terminal_height() -> u16 {
    crossterm::terminal::size().map(|(_, h)| h).unwrap_or(24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn layout_always_sums_to_terminal_height() {
        for height in [7u16, 10, 24, 50, 120] {
            for typing in [true, false] {
                let layout = compute_layout(
                    height,
                    typing,
                    2,
                    ContentSizes {
                        output: 30,
                        module: 10,
                    },
                );
                assert_eq!(layout.total(), height, "height={height} typing={typing}");
            }
        }
    }

    #[test]
    fn typing_splits_remainder_seventy_thirty() {
        let layout = compute_layout(40, true, 2, ContentSizes::default());
        // prompt = min(2 + 2, 20) = 4; remainder 36 -> 25 / 11.
        assert_eq!(layout.prompt.min, 4);
        assert_eq!(layout.output.min, 25);
        assert_eq!(layout.module.min, 11);
    }

    #[test]
    fn typing_prompt_is_capped_at_half_height() {
        let layout = compute_layout(20, true, 30, ContentSizes::default());
        assert_eq!(layout.prompt.min, 10);
    }

    #[test]
    fn idle_content_fit_gives_prompt_three_and_slack_to_output() {
        let layout = compute_layout(
            40,
            false,
            1,
            ContentSizes {
                output: 10,
                module: 5,
            },
        );
        assert_eq!(layout.prompt.min, 3);
        assert_eq!(layout.module.min, 5);
        assert_eq!(layout.output.min, 32);
    }

    #[test]
    fn idle_overflow_uses_weighted_distribution() {
        let layout = compute_layout(
            20,
            false,
            1,
            ContentSizes {
                output: 30,
                module: 20,
            },
        );
        // 0.5 / 0.3 rounded down; prompt takes the leftover.
        assert_eq!(layout.output.min, 10);
        assert_eq!(layout.module.min, 6);
        assert_eq!(layout.prompt.min, 4);
    }

    #[test]
    fn tiny_terminals_compress_output_first() {
        let (output, module, prompt) = fit(10, 8, 5, 12);
        assert_eq!(output + module + prompt, 12);
        // Output hits its floor first, module absorbs the rest, prompt is
        // untouched.
        assert_eq!(output, FLOOR_OUTPUT);
        assert_eq!(module, 4);
        assert_eq!(prompt, 5);
    }

    #[tokio::test]
    async fn orchestrator_publishes_only_on_change() {
        let bus = EventBus::new(crate::config::EventBusConfig {
            high_water_mark: 16,
            critical_publish_deadline: std::time::Duration::from_millis(50),
        });
        let orchestrator = PanelOrchestrator::new(bus.clone());

        orchestrator.update(24, false, 1, ContentSizes::default());
        orchestrator.update(24, false, 1, ContentSizes::default());
        orchestrator.update(24, true, 1, ContentSizes::default());

        use std::sync::atomic::Ordering;
        assert_eq!(bus.counters.published.load(Ordering::Relaxed), 2);
    }
}
