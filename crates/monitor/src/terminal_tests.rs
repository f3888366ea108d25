use super::*;

fn snapshot_of(chunks: &[&str]) -> String {
    let mut p = TerminalProjector::new();
    for chunk in chunks {
        p.write(chunk);
    }
    p.snapshot()
}

#[test]
fn chunk_boundary_independence() {
    let whole = "line one\nline two\x1b[2Kover\r\x1b[1Bstill here";
    let fresh = {
        let mut p = TerminalProjector::new();
        p.write(whole);
        p.snapshot()
    };
    // Split at every byte boundary and check the result is unchanged.
    for split in 0..whole.len() {
        if !whole.is_char_boundary(split) {
            continue;
        }
        let (a, b) = whole.split_at(split);
        let mut p = TerminalProjector::new();
        p.write(a);
        p.write(b);
        assert_eq!(p.snapshot(), fresh, "split at {split} diverged");
    }
}

#[test]
fn repeated_snapshot_is_stable_and_clear_resets() {
    let mut p = TerminalProjector::new();
    p.write("hello\nworld");
    let first = p.snapshot();
    let second = p.snapshot();
    assert_eq!(first, second);

    p.clear();
    assert_eq!(p.snapshot(), "");
    p.write("x");
    assert_eq!(p.snapshot(), "x");
}

#[test]
fn carriage_return_overwrite_collapses_to_final_text() {
    assert_eq!(snapshot_of(&["hi\rHELLO"]), "HELLO");
}

#[test]
fn cursor_up_overwrite_leaves_untouched_trailing_characters() {
    // §4.1's write rule never erases characters beyond those actually
    // written, so a shorter overwrite leaves the tail of the previous,
    // longer line in place (this is also how real terminals behave — a
    // well-known "ghost characters" gotcha for progress-bar style output
    // that shrinks). Row 0 therefore reads "over1", not "over" — since
    // the digit is not a space it survives per-line trailing-space
    // trimming. See DESIGN.md for this resolved ambiguity against spec §8's
    // illustrative (but arithmetically inconsistent) wording.
    assert_eq!(snapshot_of(&["line1\nline2\r\x1b[1Aover"]), "over1\nline2");
}

#[test]
fn progress_bar_style_chunks_collapse_to_one_line() {
    let mut p = TerminalProjector::new();
    for i in 0..=10u32 {
        let hashes = "#".repeat(i as usize);
        let spaces = " ".repeat(10 - i as usize);
        p.write(&format!("\r[{hashes}{spaces}] {i}%"));
    }
    assert_eq!(p.snapshot(), "[##########] 10%");
}

#[test]
fn private_mode_sequences_are_fully_ignored() {
    let mut p = TerminalProjector::new();
    p.write("abc\x1b[?1049hdef");
    assert_eq!(p.snapshot(), "abcdef");
}

#[test]
fn sgr_sequences_are_ignored() {
    let mut p = TerminalProjector::new();
    p.write("\x1b[31mred\x1b[0m text");
    assert_eq!(p.snapshot(), "red text");
}

#[test]
fn backspace_and_tab() {
    let mut p = TerminalProjector::new();
    p.write("ab\x08\x08cd"); // backspace twice then overwrite
    assert_eq!(p.snapshot(), "cd");

    let mut p = TerminalProjector::new();
    p.write("a\tb"); // tab advances to next multiple of 8
    assert_eq!(p.snapshot(), "a       b");
}

#[test]
fn cursor_down_forward_and_back() {
    let mut p = TerminalProjector::new();
    p.write("x\x1b[2By"); // CUD moves down 2 rows; column is untouched by B
    assert_eq!(p.snapshot(), "x\n\n y");

    let mut p = TerminalProjector::new();
    p.write("abc\x1b[2Dz"); // CUB moves back 2 cols, overwrites
    assert_eq!(p.snapshot(), "azc");
}

#[test]
fn cursor_position_absolute() {
    let mut p = TerminalProjector::new();
    p.write("\x1b[3;5Hx"); // CUP row3 col5 (1-indexed)
    assert_eq!(p.snapshot(), "\n\n    x");
}

#[test]
fn erase_line_modes_preserve_column() {
    let mut p = TerminalProjector::new();
    p.write("abcdefgh\x1b[4G\x1b[0K"); // move to col 4 (0-indexed 3), erase to end
    assert_eq!(p.snapshot(), "abc");

    let mut p = TerminalProjector::new();
    p.write("abcdefgh\x1b[4G\x1b[1K"); // erase from start through col (inclusive)
    assert_eq!(p.snapshot(), "    efgh");

    let mut p = TerminalProjector::new();
    p.write("abcdefgh\x1b[2K"); // erase entire line
    assert_eq!(p.snapshot(), "");
}

#[test]
fn erase_display_modes() {
    let mut p = TerminalProjector::new();
    // CUP(2,1) -> row1 col0; erase-below clears row1 to end of line (no-op,
    // col 0) and every following row. Rows 1-2 both end up empty and are
    // trimmed as trailing blank lines, leaving just row0.
    p.write("line1\nline2\nline3\x1b[2;1H\x1b[0J");
    assert_eq!(p.snapshot(), "line1");

    let mut p = TerminalProjector::new();
    // CUP(2,3) -> row1 col2; erase-above blanks row0 entirely and fills
    // row1's columns 0..=2 (inclusive) with spaces, leaving "e2" untouched.
    p.write("line1\nline2\nline3\x1b[2;3H\x1b[1J");
    assert_eq!(p.snapshot(), "\n   e2\nline3");

    let mut p = TerminalProjector::new();
    p.write("line1\nline2\x1b[2J");
    assert_eq!(p.snapshot(), "");
}

#[test]
fn save_and_restore_cursor() {
    let mut p = TerminalProjector::new();
    p.write("abc\x1b[s\n\n\ndef\x1b[uX");
    assert_eq!(p.snapshot(), "abcX\n\n\ndef");
}

proptest::proptest! {
    #[test]
    fn arbitrary_chunk_splits_agree_with_single_write(
        text in "[ -~\n\r\t]{0,80}",
        split_a in 0usize..40,
        split_b in 0usize..40,
    ) {
        let mut whole = TerminalProjector::new();
        whole.write(&text);
        let expected = whole.snapshot();

        let mut lo = split_a.min(split_b);
        let mut hi = split_a.max(split_b);
        lo = lo.min(text.len());
        hi = hi.min(text.len());
        while lo > 0 && !text.is_char_boundary(lo) { lo -= 1; }
        while hi > 0 && !text.is_char_boundary(hi) { hi -= 1; }
        if lo > hi { std::mem::swap(&mut lo, &mut hi); }

        let mut chunked = TerminalProjector::new();
        chunked.write(&text[..lo]);
        chunked.write(&text[lo..hi]);
        chunked.write(&text[hi..]);
        proptest::prop_assert_eq!(chunked.snapshot(), expected);
    }
}
