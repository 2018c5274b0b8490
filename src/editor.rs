/// One indent step, as inserted by Tab and smart newline.
pub const INDENT_UNIT: &str = "  ";

/// Line-comment marker toggled by Ctrl+/.
pub const LINE_COMMENT: &str = "//";

/// Fixed opener/closer map shared by auto-pairing, closer skip, and paired
/// backspace.
pub struct PairTable;

const PAIRS: [(char, char); 6] = [
    ('(', ')'),
    ('[', ']'),
    ('{', '}'),
    ('"', '"'),
    ('\'', '\''),
    ('`', '`'),
];

impl PairTable {
    pub fn closer(open: char) -> Option<char> {
        PAIRS.iter().find(|(o, _)| *o == open).map(|(_, c)| *c)
    }

    pub fn is_opener(c: char) -> bool {
        Self::closer(c).is_some()
    }

    pub fn is_closer(c: char) -> bool {
        PAIRS.iter().any(|(_, close)| *close == c)
    }

    pub fn is_quote(c: char) -> bool {
        matches!(c, '"' | '\'' | '`')
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Key identity plus modifiers, as delivered by the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Tab,
    Backspace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub ctrl: bool,
    pub shift: bool,
}

impl KeyEvent {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            ctrl: false,
            shift: false,
        }
    }

    pub fn ctrl(key: Key) -> Self {
        Self {
            key,
            ctrl: true,
            shift: false,
        }
    }

    pub fn shift(key: Key) -> Self {
        Self {
            key,
            ctrl: false,
            shift: true,
        }
    }
}

/// Editable text plus a selection, offsets counted in characters. A caret is
/// an empty selection. Every operation is total: out-of-range input clamps,
/// edge cases degrade to no-ops, nothing fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditorBuffer {
    text: String,
    selection_start: usize,
    selection_end: usize,
}

impl EditorBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            selection_start: 0,
            selection_end: 0,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn selection(&self) -> (usize, usize) {
        (self.selection_start, self.selection_end)
    }

    pub fn set_selection(&mut self, start: usize, end: usize) {
        let limit = self.char_count();
        let a = start.min(limit);
        let b = end.min(limit);
        self.selection_start = a.min(b);
        self.selection_end = a.max(b);
    }

    pub fn set_caret(&mut self, pos: usize) {
        self.set_selection(pos, pos);
    }

    pub fn has_selection(&self) -> bool {
        self.selection_start != self.selection_end
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn line_count(&self) -> usize {
        self.text.split('\n').count()
    }

    /// Selected text, empty for a caret.
    pub fn selected_text(&self) -> String {
        self.text
            .chars()
            .skip(self.selection_start)
            .take(self.selection_end - self.selection_start)
            .collect()
    }

    // ---- key dispatch ----

    /// Route one key event to the matching operation. Returns whether the
    /// event was consumed.
    pub fn handle_key(&mut self, event: KeyEvent) -> bool {
        match (event.key, event.ctrl, event.shift) {
            (Key::Tab, false, false) => self.indent(),
            (Key::Tab, false, true) => self.outdent(),
            (Key::Enter, false, _) => self.insert_newline(),
            (Key::Backspace, false, _) => self.backspace(),
            (Key::Char('/'), true, _) => self.toggle_comment(),
            (Key::Char(c), false, _) => self.insert_char(c),
            _ => return false,
        }
        true
    }

    // ---- operations ----

    /// Insert one indent unit at the selection, replacing it.
    pub fn indent(&mut self) {
        let start = self.selection_start;
        self.replace_range(start, self.selection_end, INDENT_UNIT);
        self.set_caret(start + INDENT_UNIT.len());
    }

    /// Remove one indent unit from the start of the current line, if the
    /// line begins with one. Selection offsets shift left but never cross
    /// the line start.
    pub fn outdent(&mut self) {
        let line_start = self.line_start(self.selection_start);
        let leads_with_unit = self
            .text
            .chars()
            .skip(line_start)
            .take(INDENT_UNIT.len())
            .eq(INDENT_UNIT.chars());
        if !leads_with_unit {
            return;
        }

        let width = INDENT_UNIT.len();
        self.replace_range(line_start, line_start + width, "");
        let shift = |pos: usize| {
            if pos >= line_start + width {
                pos - width
            } else {
                line_start
            }
        };
        self.selection_start = shift(self.selection_start);
        self.selection_end = shift(self.selection_end);
    }

    /// Smart newline. An empty matched pair around the caret expands to
    /// three lines with the caret on the blank, extra-indented middle line;
    /// a trailing opener deepens the indent by one unit; otherwise the
    /// current line's leading whitespace carries over.
    pub fn insert_newline(&mut self) {
        if self.has_selection() {
            let start = self.selection_start;
            self.replace_range(start, self.selection_end, "");
            self.set_caret(start);
        }

        let caret = self.selection_start;
        let line_start = self.line_start(caret);
        let before: String = self
            .text
            .chars()
            .skip(line_start)
            .take(caret - line_start)
            .collect();
        let indent: String = before
            .chars()
            .take_while(|c| *c == ' ' || *c == '\t')
            .collect();

        if caret > 0 {
            let prev = self.char_at(caret - 1);
            let next = self.char_at(caret);
            if let (Some(p), Some(n)) = (prev, next) {
                if PairTable::closer(p) == Some(n) {
                    let inserted = format!("\n{indent}{INDENT_UNIT}\n{indent}");
                    self.replace_range(caret, caret, &inserted);
                    self.set_caret(caret + 1 + indent.chars().count() + INDENT_UNIT.len());
                    return;
                }
            }
        }

        let trimmed = before.trim_end_matches([' ', '\t']);
        if trimmed.ends_with(['(', '[', '{']) {
            let inserted = format!("\n{indent}{INDENT_UNIT}");
            self.replace_range(caret, caret, &inserted);
            self.set_caret(caret + inserted.chars().count());
            return;
        }

        let inserted = format!("\n{indent}");
        self.replace_range(caret, caret, &inserted);
        self.set_caret(caret + inserted.chars().count());
    }

    /// Insert one typed character with pairing rules: openers wrap a
    /// selection keeping it selected; at a caret they insert open+close and
    /// park the caret between, except that quotes do not pair right after a
    /// word character. Typing a closer that already sits to the right skips
    /// over it.
    pub fn insert_char(&mut self, c: char) {
        let (start, end) = (self.selection_start, self.selection_end);

        if start != end {
            if let Some(close) = PairTable::closer(c) {
                let wrapped = format!("{c}{}{close}", self.selected_text());
                self.replace_range(start, end, &wrapped);
                self.selection_start = start + 1;
                self.selection_end = end + 1;
                return;
            }
            self.replace_range(start, end, &c.to_string());
            self.set_caret(start + 1);
            return;
        }

        if PairTable::is_closer(c) && self.char_at(start) == Some(c) {
            self.set_caret(start + 1);
            return;
        }

        if let Some(close) = PairTable::closer(c) {
            let gated = PairTable::is_quote(c)
                && start > 0
                && self.char_at(start - 1).is_some_and(is_word_char);
            if !gated {
                self.replace_range(start, start, &format!("{c}{close}"));
                self.set_caret(start + 1);
                return;
            }
        }

        self.replace_range(start, start, &c.to_string());
        self.set_caret(start + 1);
    }

    /// Delete backward: the selection if there is one, both characters of
    /// an empty matched pair around the caret, else one character.
    pub fn backspace(&mut self) {
        let (start, end) = (self.selection_start, self.selection_end);
        if start != end {
            self.replace_range(start, end, "");
            self.set_caret(start);
            return;
        }
        if start == 0 {
            return;
        }

        let prev = self.char_at(start - 1);
        let next = self.char_at(start);
        if let (Some(p), Some(n)) = (prev, next) {
            if PairTable::closer(p) == Some(n) {
                self.replace_range(start - 1, start + 1, "");
                self.set_caret(start - 1);
                return;
            }
        }

        self.replace_range(start - 1, start, "");
        self.set_caret(start - 1);
    }

    /// Toggle the line-comment marker over every line the selection
    /// touches. When every non-blank covered line is already commented the
    /// markers are stripped, else `// ` is inserted at each non-blank
    /// line's first non-whitespace column. Blank lines stay untouched. The
    /// selection extends to the whole covered lines.
    pub fn toggle_comment(&mut self) {
        let first = self.line_start(self.selection_start);
        let last = self.line_end(self.selection_end);
        let region: String = self.text.chars().skip(first).take(last - first).collect();

        let lines: Vec<&str> = region.split('\n').collect();
        let mut non_blank = 0;
        let mut all_commented = true;
        for line in &lines {
            let rest = line.trim_start_matches([' ', '\t']);
            if rest.is_empty() {
                continue;
            }
            non_blank += 1;
            if !rest.starts_with(LINE_COMMENT) {
                all_commented = false;
            }
        }

        let uncomment = non_blank > 0 && all_commented;
        let toggled: Vec<String> = lines
            .iter()
            .map(|line| {
                let indent_len = line
                    .chars()
                    .take_while(|c| *c == ' ' || *c == '\t')
                    .count();
                let indent: String = line.chars().take(indent_len).collect();
                let rest: String = line.chars().skip(indent_len).collect();
                if rest.is_empty() {
                    return line.to_string();
                }
                if uncomment {
                    let stripped = rest.strip_prefix(LINE_COMMENT).unwrap_or(&rest);
                    let stripped = stripped.strip_prefix(' ').unwrap_or(stripped);
                    format!("{indent}{stripped}")
                } else {
                    format!("{indent}{LINE_COMMENT} {rest}")
                }
            })
            .collect();

        let replacement = toggled.join("\n");
        self.replace_range(first, last, &replacement);
        self.selection_start = first;
        self.selection_end = first + replacement.chars().count();
    }

    // ---- char-offset plumbing ----

    fn char_at(&self, pos: usize) -> Option<char> {
        self.text.chars().nth(pos)
    }

    fn byte_at(&self, char_pos: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_pos)
            .map(|(b, _)| b)
            .unwrap_or(self.text.len())
    }

    fn replace_range(&mut self, start: usize, end: usize, insert: &str) {
        let from = self.byte_at(start);
        let to = self.byte_at(end.max(start));
        self.text.replace_range(from..to, insert);
    }

    /// Char offset of the start of the line containing `pos`.
    fn line_start(&self, pos: usize) -> usize {
        let mut start = 0;
        for (i, c) in self.text.chars().enumerate().take(pos) {
            if c == '\n' {
                start = i + 1;
            }
        }
        start
    }

    /// Char offset just before the newline ending the line containing
    /// `pos`, or the end of the text.
    fn line_end(&self, pos: usize) -> usize {
        for (i, c) in self.text.chars().enumerate().skip(pos) {
            if c == '\n' {
                return i;
            }
        }
        self.char_count()
    }
}
