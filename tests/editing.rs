// Editing-surface tests: lossless scanning, highlight tiling, and the
// editor state machine driven through key events.

use sandpad::editor::{EditorBuffer, Key, KeyEvent};
use sandpad::highlight::{ansi_line, highlight, Color, Theme};
use sandpad::report::RunStatus;
use sandpad::sandbox::Sandbox;
use sandpad::scan::{scan, TokenKind};

fn type_text(buf: &mut EditorBuffer, text: &str) {
    for c in text.chars() {
        buf.handle_key(KeyEvent::new(Key::Char(c)));
    }
}

#[test]
fn scanning_reconstructs_any_source() {
    let cases = [
        "let x = 42",
        "console.log(`sum: ${a + b}`)",
        "\"unterminated line one\nline two",
        "/* open block",
        "function f() { return 'mixed \"quotes\"' }",
        "  \t weird\u{a0}whitespace \u{1F980} ",
        "",
    ];
    for source in cases {
        let rebuilt: String = scan(source).iter().map(|t| t.text.as_str()).collect();
        assert_eq!(rebuilt, source, "case: {source:?}");
    }
}

#[test]
fn classification_of_a_representative_line() {
    let kinds: Vec<TokenKind> = scan("let x = console.log(\"hi\") // done")
        .iter()
        .map(|t| t.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::Keyword,
            TokenKind::Plain,
            TokenKind::Ident,
            TokenKind::Plain,
            TokenKind::Operator,
            TokenKind::Plain,
            TokenKind::Builtin,
            TokenKind::Operator,
            TokenKind::Function,
            TokenKind::Bracket,
            TokenKind::Str,
            TokenKind::Bracket,
            TokenKind::Plain,
            TokenKind::Comment,
        ]
    );
}

#[test]
fn highlight_spans_tile_the_input() {
    let source = "const n = 1 // note";
    let theme = Theme::dark();
    let spans = highlight(&scan(source), &theme);

    assert_eq!(spans.first().map(|s| s.start), Some(0));
    assert_eq!(spans.last().map(|s| s.end), Some(source.chars().count()));
    for pair in spans.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }

    assert_ne!(
        theme.style(TokenKind::Keyword),
        theme.style(TokenKind::Comment)
    );
}

#[test]
fn theme_colors_round_trip_through_hex() {
    let color = Color::from_hex("#B5CEA8").unwrap();
    assert_eq!(color.hex(), "#B5CEA8");
    assert!(Color::from_hex("B5CEA8").is_none());
    assert!(Color::from_hex("#GGGGGG").is_none());
    assert!(Color::from_hex("#FFF").is_none());

    let theme = Theme::light();
    let json = serde_json::to_string(&theme).unwrap();
    let back: Theme = serde_json::from_str(&json).unwrap();
    assert_eq!(back, theme);
}

#[test]
fn ansi_rendering_emits_escape_sequences() {
    let rendered = ansi_line("let x = 1", &Theme::dark());
    assert!(rendered.contains("\u{1b}["));
    assert!(rendered.contains("let"));
}

#[test]
fn three_line_comment_toggle_round_trips() {
    let original = "function f() {\n  return 1\n}";
    let mut buf = EditorBuffer::new(original);
    buf.set_selection(0, original.chars().count());

    assert!(buf.handle_key(KeyEvent::ctrl(Key::Char('/'))));
    assert_eq!(buf.text(), "// function f() {\n  // return 1\n// }");

    assert!(buf.handle_key(KeyEvent::ctrl(Key::Char('/'))));
    assert_eq!(buf.text(), original);
}

#[test]
fn typing_builds_paired_structures() {
    let mut buf = EditorBuffer::new("");
    type_text(&mut buf, "if (ready) {");
    buf.handle_key(KeyEvent::new(Key::Enter));
    assert_eq!(buf.text(), "if (ready) {\n  \n}");

    type_text(&mut buf, "go()");
    assert_eq!(buf.text(), "if (ready) {\n  go()\n}");
}

#[test]
fn quote_wraps_the_selection() {
    let mut buf = EditorBuffer::new("console.log(world)");
    buf.set_selection(12, 17);
    buf.insert_char('"');
    assert_eq!(buf.text(), "console.log(\"world\")");
    assert_eq!(buf.selected_text(), "world");
}

#[test]
fn tab_and_shift_tab_are_inverse_at_line_start() {
    let mut buf = EditorBuffer::new("first\nsecond");
    buf.set_caret(6);
    buf.handle_key(KeyEvent::new(Key::Tab));
    assert_eq!(buf.text(), "first\n  second");
    buf.handle_key(KeyEvent::shift(Key::Tab));
    assert_eq!(buf.text(), "first\nsecond");
    assert_eq!(buf.selection(), (6, 6));
}

#[test]
fn every_auto_pair_backspaces_away() {
    for opener in ['(', '[', '{', '"', '\'', '`'] {
        let mut buf = EditorBuffer::new("x = ");
        buf.set_caret(4);
        buf.insert_char(opener);
        buf.backspace();
        assert_eq!(buf.text(), "x = ", "opener {opener}");
        assert_eq!(buf.selection(), (4, 4));
    }
}

#[test]
fn typed_program_executes_in_the_sandbox() {
    let mut buf = EditorBuffer::new("");
    type_text(&mut buf, "console.log(7)");
    assert_eq!(buf.text(), "console.log(7)");

    let mut sandbox = Sandbox::default();
    let report = sandbox.run(buf.text());
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.entries[0].content, "7");
}
