//! Renders a decoded [`crate::note::Note`] as an SVG drawing. Kept
//! deliberately small: one `<path>` element per stroke, `M`/`L` commands
//! only, no styling beyond a stroke colour and width.

use std::io::Write;

use crate::error::Result;
use crate::note::Note;

const STROKE_WIDTH: u32 = 4;
const STROKE_COLOUR: &str = "black";

/// Write `note` as a standalone SVG document to `out`. Coordinates are
/// used verbatim as the device reports them (no scaling or offsetting);
/// the `viewBox` is widened by one stroke width on each side so strokes
/// at the extreme edges are not clipped.
pub fn write_svg<W: Write>(note: &Note, out: &mut W) -> Result<()> {
    let (min_x, min_y, max_x, max_y) = bounds(note);
    let margin = STROKE_WIDTH as i64;
    let view_x = min_x - margin;
    let view_y = min_y - margin;
    let view_w = (max_x - min_x) + margin * 2;
    let view_h = (max_y - min_y) + margin * 2;

    writeln!(
        out,
        r#"<?xml version="1.0" encoding="UTF-8"?>"#
    )?;
    writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="{view_x} {view_y} {view_w} {view_h}">"#
    )?;
    for path in &note.paths {
        if path.is_empty() {
            continue;
        }
        write!(out, r#"  <path d="M{} {}"#, path[0].x, path[0].y)?;
        for coord in &path[1..] {
            write!(out, r#" L{} {}"#, coord.x, coord.y)?;
        }
        writeln!(
            out,
            r#"" fill="none" stroke="{STROKE_COLOUR}" stroke-width="{STROKE_WIDTH}" stroke-linecap="round"/>"#
        )?;
    }
    writeln!(out, "</svg>")?;
    Ok(())
}

fn bounds(note: &Note) -> (i64, i64, i64, i64) {
    let mut min_x = 0i64;
    let mut min_y = 0i64;
    let mut max_x = 0i64;
    let mut max_y = 0i64;
    let mut seen = false;
    for path in &note.paths {
        for coord in path {
            let (x, y) = (coord.x as i64, coord.y as i64);
            if !seen {
                min_x = x;
                max_x = x;
                min_y = y;
                max_y = y;
                seen = true;
            } else {
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);
            }
        }
    }
    (min_x, min_y, max_x, max_y)
}
