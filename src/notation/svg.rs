use crate::notation::ast::{Accidental, BarKind, Clef, MeterSymbol};
use crate::notation::visual::{
    Glyph, GlyphKind, NoteHead, NoteValue, Staff, VisualScore, LINE_GAP, STAFF_HEIGHT,
};

const HIGHLIGHT_COLOR: &str = "#e8590c";
const INK: &str = "#1e293b";

/// Treble-clef positions of the key signature sharps (F C G D A E B)
const SHARP_POSITIONS: [i32; 7] = [8, 5, 9, 6, 3, 7, 4];
/// Treble-clef positions of the key signature flats (B E A D G C F)
const FLAT_POSITIONS: [i32; 7] = [4, 7, 3, 6, 2, 5, 1];

/// Render a Visual Score to an SVG document.
///
/// Every drawable element becomes a `<g>` whose id is `{id_prefix}-e{n}`; the
/// prefix keeps ids unique when several scores share one page. Elements in the
/// score's highlighted set carry the `highlight` class.
pub fn to_svg(score: &VisualScore, id_prefix: &str) -> String {
    let mut svg = String::new();
    let prefix = escape_xml(id_prefix);

    svg.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" id=\"{}\" class=\"notation\" width=\"{:.1}\" height=\"{:.1}\" viewBox=\"0 0 {:.1} {:.1}\">\n",
        prefix,
        score.width * score.scale,
        score.height * score.scale,
        score.width,
        score.height
    ));
    svg.push_str(&format!(
        "  <style>#{p} .highlight {{ fill: {c}; stroke: {c}; }} #{p} text {{ font-family: serif; }}</style>\n",
        p = prefix,
        c = HIGHLIGHT_COLOR
    ));

    // Titles
    let center = score.width / 2.0;
    let mut title_y = 28.0;
    if let Some(title) = &score.title {
        svg.push_str(&format!(
            "  <text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" font-size=\"18\" font-weight=\"bold\" fill=\"{}\">{}</text>\n",
            center,
            title_y,
            INK,
            escape_xml(title)
        ));
        title_y += 16.0;
    }
    for subtitle in &score.subtitles {
        svg.push_str(&format!(
            "  <text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" font-size=\"13\" fill=\"{}\">{}</text>\n",
            center,
            title_y,
            INK,
            escape_xml(subtitle)
        ));
        title_y += 16.0;
    }
    if let Some(composer) = &score.composer {
        svg.push_str(&format!(
            "  <text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"end\" font-size=\"11\" font-style=\"italic\" fill=\"{}\">{}</text>\n",
            score.width - 15.0,
            title_y,
            INK,
            escape_xml(composer)
        ));
    }

    for staff in &score.staves {
        staff_to_svg(&mut svg, staff);
    }

    for glyph in &score.glyphs {
        let Some(staff) = score.staff(glyph.voice, glyph.system) else {
            continue;
        };
        glyph_to_svg(&mut svg, glyph, staff, &prefix, score.is_highlighted(glyph.id));
    }

    svg.push_str("</svg>\n");
    svg
}

/// y coordinate of a staff position (0 = bottom line, each step half a line gap)
fn position_y(staff: &Staff, position: i32) -> f64 {
    staff.y + STAFF_HEIGHT - position as f64 * LINE_GAP / 2.0
}

fn staff_to_svg(svg: &mut String, staff: &Staff) {
    let left = 15.0;
    let right = staff.width - 15.0;
    svg.push_str(&format!("  <g class=\"staff\" stroke=\"{}\" stroke-width=\"1\">\n", INK));
    for line in 0..5 {
        let y = staff.y + line as f64 * LINE_GAP;
        svg.push_str(&format!(
            "    <line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\"/>\n",
            left, y, right, y
        ));
    }
    svg.push_str("  </g>\n");

    // Clef
    let (symbol, position) = match staff.clef {
        Clef::Treble => ("\u{1D11E}", 2),
        Clef::Bass => ("\u{1D122}", 6),
        Clef::Alto => ("\u{1D121}", 4),
    };
    svg.push_str(&format!(
        "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"38\" fill=\"{}\">{}</text>\n",
        left + 2.0,
        position_y(staff, position) + 6.0,
        INK,
        symbol
    ));

    // Key signature
    let shift = match staff.clef {
        Clef::Treble => 0,
        Clef::Bass => -2,
        Clef::Alto => -1,
    };
    let count = staff.key_fifths.unsigned_abs() as usize;
    let (positions, symbol) = if staff.key_fifths > 0 {
        (&SHARP_POSITIONS, "\u{266F}")
    } else {
        (&FLAT_POSITIONS, "\u{266D}")
    };
    for (i, position) in positions.iter().take(count).enumerate() {
        svg.push_str(&format!(
            "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"16\" fill=\"{}\">{}</text>\n",
            left + 32.0 + i as f64 * 9.0,
            position_y(staff, position + shift) + 5.0,
            INK,
            symbol
        ));
    }

    // Time signature
    if let Some(meter) = staff.meter {
        let x = left + 36.0 + count as f64 * 9.0;
        match meter.symbol {
            MeterSymbol::Common | MeterSymbol::Cut => {
                let symbol = if meter.symbol == MeterSymbol::Common { "\u{1D134}" } else { "\u{1D135}" };
                svg.push_str(&format!(
                    "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"24\" fill=\"{}\">{}</text>\n",
                    x,
                    staff.y + STAFF_HEIGHT / 2.0 + 8.0,
                    INK,
                    symbol
                ));
            }
            MeterSymbol::Numeric => {
                svg.push_str(&format!(
                    "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"20\" font-weight=\"bold\" fill=\"{}\">{}</text>\n",
                    x,
                    staff.y + STAFF_HEIGHT / 2.0 - 2.0,
                    INK,
                    meter.beats
                ));
                svg.push_str(&format!(
                    "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"20\" font-weight=\"bold\" fill=\"{}\">{}</text>\n",
                    x,
                    staff.y + STAFF_HEIGHT - 2.0,
                    INK,
                    meter.beat_type
                ));
            }
        }
    }
}

fn glyph_to_svg(svg: &mut String, glyph: &Glyph, staff: &Staff, prefix: &str, highlighted: bool) {
    let class = match glyph.kind {
        GlyphKind::Note { .. } => "note",
        GlyphKind::Rest { .. } | GlyphKind::MultiRest { .. } => "rest",
        GlyphKind::Bar { .. } => "bar",
    };
    let class = if highlighted {
        format!("{} highlight", class)
    } else {
        class.to_string()
    };
    svg.push_str(&format!(
        "  <g id=\"{}-{}\" class=\"{}\" fill=\"{}\" stroke=\"{}\">\n",
        prefix, glyph.id, class, INK, INK
    ));

    if let Some(symbol) = &glyph.chord_symbol {
        svg.push_str(&format!(
            "    <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"12\" stroke=\"none\">{}</text>\n",
            glyph.x - 4.0,
            staff.y - 14.0,
            escape_xml(symbol)
        ));
    }
    for (i, annotation) in glyph.annotations.iter().enumerate() {
        svg.push_str(&format!(
            "    <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"10\" font-style=\"italic\" stroke=\"none\">{}</text>\n",
            glyph.x - 4.0,
            staff.y - 26.0 - i as f64 * 11.0,
            escape_xml(annotation)
        ));
    }

    match &glyph.kind {
        GlyphKind::Note { heads, value, dots, tie } => note_to_svg(svg, glyph.x, heads, *value, *dots, *tie, staff),
        GlyphKind::Rest { value, dots } => rest_to_svg(svg, glyph.x, *value, *dots, staff),
        GlyphKind::MultiRest { measures } => {
            let y = staff.y + STAFF_HEIGHT / 2.0;
            svg.push_str(&format!(
                "    <rect x=\"{:.1}\" y=\"{:.1}\" width=\"40\" height=\"6\" stroke=\"none\"/>\n",
                glyph.x,
                y - 3.0
            ));
            svg.push_str(&format!(
                "    <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"16\" font-weight=\"bold\" text-anchor=\"middle\" stroke=\"none\">{}</text>\n",
                glyph.x + 20.0,
                staff.y - 6.0,
                measures
            ));
        }
        GlyphKind::Bar { kind, ending } => bar_to_svg(svg, glyph.x, *kind, *ending, staff),
    }

    svg.push_str("  </g>\n");
}

fn note_to_svg(
    svg: &mut String,
    x: f64,
    heads: &[NoteHead],
    value: NoteValue,
    dots: u8,
    tie: bool,
    staff: &Staff,
) {
    let Some(lowest) = heads.first() else {
        return;
    };
    let highest = heads.last().unwrap_or(lowest);

    // Ledger lines below and above the staff
    let mut position = -2;
    while position >= lowest.position {
        ledger_line(svg, x, position_y(staff, position));
        position -= 2;
    }
    let mut position = 10;
    while position <= highest.position {
        ledger_line(svg, x, position_y(staff, position));
        position += 2;
    }

    for head in heads {
        let y = position_y(staff, head.position);
        let fill = if value.is_open() { "none" } else { "currentColor" };
        svg.push_str(&format!(
            "    <ellipse cx=\"{:.1}\" cy=\"{:.1}\" rx=\"6\" ry=\"4.2\" transform=\"rotate(-20 {:.1} {:.1})\" fill=\"{}\" stroke-width=\"1.5\"/>\n",
            x, y, x, y, fill
        ));
        if let Some(accidental) = head.accidental {
            svg.push_str(&format!(
                "    <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"16\" stroke=\"none\">{}</text>\n",
                x - 17.0,
                y + 5.0,
                accidental_symbol(accidental)
            ));
        }
        for dot in 0..dots {
            svg.push_str(&format!(
                "    <circle cx=\"{:.1}\" cy=\"{:.1}\" r=\"1.8\" stroke=\"none\"/>\n",
                x + 11.0 + dot as f64 * 5.0,
                y - if head.position % 2 == 0 { 3.0 } else { 0.0 }
            ));
        }
        if tie {
            svg.push_str(&format!(
                "    <path d=\"M {:.1} {:.1} Q {:.1} {:.1} {:.1} {:.1}\" fill=\"none\" stroke-width=\"1.2\"/>\n",
                x + 6.0,
                y + 6.0,
                x + 18.0,
                y + 13.0,
                x + 30.0,
                y + 6.0
            ));
        }
    }

    if value.has_stem() {
        let average = heads.iter().map(|h| h.position).sum::<i32>() as f64 / heads.len() as f64;
        let stem_up = average < 4.0;
        let (stem_x, from, to) = if stem_up {
            (x + 5.5, position_y(staff, lowest.position), position_y(staff, highest.position) - 32.0)
        } else {
            (x - 5.5, position_y(staff, highest.position), position_y(staff, lowest.position) + 32.0)
        };
        svg.push_str(&format!(
            "    <line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke-width=\"1.3\"/>\n",
            stem_x, from, stem_x, to
        ));
        for flag in 0..value.flags() {
            let offset = flag as f64 * 7.0;
            let (y0, y1) = if stem_up { (to + offset, to + offset + 12.0) } else { (to - offset, to - offset - 12.0) };
            svg.push_str(&format!(
                "    <path d=\"M {:.1} {:.1} Q {:.1} {:.1} {:.1} {:.1}\" fill=\"none\" stroke-width=\"2\"/>\n",
                stem_x,
                y0,
                stem_x + 9.0,
                (y0 + y1) / 2.0,
                stem_x + 7.0,
                y1
            ));
        }
    }
}

fn ledger_line(svg: &mut String, x: f64, y: f64) {
    svg.push_str(&format!(
        "    <line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke-width=\"1\"/>\n",
        x - 10.0,
        y,
        x + 10.0,
        y
    ));
}

fn rest_to_svg(svg: &mut String, x: f64, value: NoteValue, dots: u8, staff: &Staff) {
    let middle = staff.y + STAFF_HEIGHT / 2.0;
    match value {
        // Whole rest hangs from the fourth line, half rest sits on the middle line
        NoteValue::Whole => svg.push_str(&format!(
            "    <rect x=\"{:.1}\" y=\"{:.1}\" width=\"12\" height=\"5\" stroke=\"none\"/>\n",
            x - 6.0,
            staff.y + LINE_GAP
        )),
        NoteValue::Half => svg.push_str(&format!(
            "    <rect x=\"{:.1}\" y=\"{:.1}\" width=\"12\" height=\"5\" stroke=\"none\"/>\n",
            x - 6.0,
            middle - 5.0
        )),
        other => {
            let symbol = match other {
                NoteValue::Quarter => "\u{1D13D}",
                NoteValue::Eighth => "\u{1D13E}",
                NoteValue::Sixteenth => "\u{1D13F}",
                _ => "\u{1D140}",
            };
            svg.push_str(&format!(
                "    <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"30\" stroke=\"none\">{}</text>\n",
                x - 6.0,
                middle + 10.0,
                symbol
            ));
        }
    }
    for dot in 0..dots {
        svg.push_str(&format!(
            "    <circle cx=\"{:.1}\" cy=\"{:.1}\" r=\"1.8\" stroke=\"none\"/>\n",
            x + 10.0 + dot as f64 * 5.0,
            middle - 5.0
        ));
    }
}

fn bar_to_svg(svg: &mut String, x: f64, kind: BarKind, ending: Option<u8>, staff: &Staff) {
    let top = staff.y;
    let bottom = staff.y + STAFF_HEIGHT;
    let thin = |svg: &mut String, x: f64| {
        svg.push_str(&format!(
            "    <line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke-width=\"1\"/>\n",
            x, top, x, bottom
        ))
    };
    let thick = |svg: &mut String, x: f64| {
        svg.push_str(&format!(
            "    <rect x=\"{:.1}\" y=\"{:.1}\" width=\"3.5\" height=\"{:.1}\" stroke=\"none\"/>\n",
            x - 1.75,
            top,
            STAFF_HEIGHT
        ))
    };
    let dots = |svg: &mut String, x: f64| {
        for y in [top + 15.0, top + 25.0] {
            svg.push_str(&format!(
                "    <circle cx=\"{:.1}\" cy=\"{:.1}\" r=\"2\" stroke=\"none\"/>\n",
                x, y
            ));
        }
    };

    match kind {
        BarKind::Single => thin(svg, x),
        BarKind::Double => {
            thin(svg, x - 2.0);
            thin(svg, x + 2.0);
        }
        BarKind::Final => {
            thin(svg, x - 3.0);
            thick(svg, x + 2.0);
        }
        BarKind::Start => {
            thick(svg, x - 2.0);
            thin(svg, x + 3.0);
        }
        BarKind::RepeatStart => {
            thick(svg, x - 2.0);
            thin(svg, x + 3.0);
            dots(svg, x + 8.0);
        }
        BarKind::RepeatEnd => {
            dots(svg, x - 8.0);
            thin(svg, x - 3.0);
            thick(svg, x + 2.0);
        }
        BarKind::RepeatBoth => {
            dots(svg, x - 9.0);
            thin(svg, x - 4.0);
            thin(svg, x + 4.0);
            dots(svg, x + 9.0);
        }
    }

    if let Some(n) = ending {
        svg.push_str(&format!(
            "    <path d=\"M {:.1} {:.1} L {:.1} {:.1} L {:.1} {:.1}\" fill=\"none\" stroke-width=\"1\"/>\n",
            x + 2.0,
            top - 8.0,
            x + 2.0,
            top - 22.0,
            x + 60.0,
            top - 22.0
        ));
        svg.push_str(&format!(
            "    <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"11\" stroke=\"none\">{}.</text>\n",
            x + 6.0,
            top - 11.0,
            n
        ));
    }
}

fn accidental_symbol(accidental: Accidental) -> &'static str {
    match accidental {
        Accidental::DoubleFlat => "\u{1D12B}",
        Accidental::Flat => "\u{266D}",
        Accidental::Natural => "\u{266E}",
        Accidental::Sharp => "\u{266F}",
        Accidental::DoubleSharp => "\u{1D12A}",
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
