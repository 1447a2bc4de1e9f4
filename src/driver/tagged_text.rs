//! Inline `{tag}` markup used by the app layer's print-text command.
//!
//! Recognised tags: `{reset} {br} {b} {/b} {u} {/u} {i} {/i} {s} {/s}
//! {h} {/h} {w} {/w} {left} {center} {right}`. Anything else between braces
//! is printed as-is. ESC/POS has no italic mode, so `{i}` is accepted and
//! ignored.

use super::escpos::EscPosBuilder;
use super::Alignment;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Tag(&'a str),
}

fn tokenize(input: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut rest = input;
    while !rest.is_empty() {
        match rest.find('{') {
            None => {
                pieces.push(Piece::Text(rest));
                break;
            }
            Some(open) => {
                if open > 0 {
                    pieces.push(Piece::Text(&rest[..open]));
                }
                let after = &rest[open..];
                match after.find('}') {
                    Some(close) => {
                        pieces.push(Piece::Tag(&after[1..close]));
                        rest = &after[close + 1..];
                    }
                    None => {
                        pieces.push(Piece::Text(after));
                        break;
                    }
                }
            }
        }
    }
    pieces
}

#[derive(Default)]
struct Style {
    wide: bool,
    tall: bool,
}

impl Style {
    fn apply_size(&self, b: &mut EscPosBuilder) {
        b.text_size(if self.wide { 2 } else { 1 }, if self.tall { 2 } else { 1 });
    }
}

/// Append `markup` to the builder, translating tags to commands.
pub fn render(markup: &str, b: &mut EscPosBuilder) {
    let mut style = Style::default();
    for piece in tokenize(markup) {
        match piece {
            Piece::Text(t) => {
                b.text(t);
            }
            Piece::Tag(tag) => match tag.trim().to_ascii_lowercase().as_str() {
                "reset" => {
                    style = Style::default();
                    b.bold(false)
                        .underline(0)
                        .small_font(false)
                        .text_size(1, 1)
                        .align(Alignment::Left);
                }
                "br" => {
                    b.lf();
                }
                "b" => {
                    b.bold(true);
                }
                "/b" => {
                    b.bold(false);
                }
                "u" => {
                    b.underline(1);
                }
                "/u" => {
                    b.underline(0);
                }
                "i" | "/i" => {}
                "s" => {
                    b.small_font(true);
                }
                "/s" => {
                    b.small_font(false);
                }
                "h" => {
                    style.tall = true;
                    style.apply_size(b);
                }
                "/h" => {
                    style.tall = false;
                    style.apply_size(b);
                }
                "w" => {
                    style.wide = true;
                    style.apply_size(b);
                }
                "/w" => {
                    style.wide = false;
                    style.apply_size(b);
                }
                "left" => {
                    b.align(Alignment::Left);
                }
                "center" => {
                    b.align(Alignment::Center);
                }
                "right" => {
                    b.align(Alignment::Right);
                }
                _ => {
                    b.text("{").text(tag).text("}");
                }
            },
        }
    }
}
