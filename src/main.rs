use clap::Parser;
use log::{debug, info};
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "phaselook")]
#[command(about = "Visualize phase blocks along chromosomes in 1D.", long_about = None)]
struct Args {
    // MANDATORY OPTIONS
    /// Load the phase blocks (name line / boundary line pairs) from this FILE.
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    input: PathBuf,

    /// Write the visualization to this FILE (PNG or SVG based on extension).
    #[arg(short = 'o', long = "out", value_name = "FILE")]
    out: PathBuf,

    // Canvas Options
    /// Pixel density of the canvas.
    #[arg(short = 'p', long = "pixels-per-inch", value_name = "N", default_value_t = 80)]
    pixels_per_inch: u32,

    /// Width of the scalable drawing area in inches.
    #[arg(short = 'x', long = "width-inches", value_name = "N", default_value_t = 12)]
    width_inches: u32,

    /// Height of the canvas in inches.
    #[arg(short = 'y', long = "height-inches", value_name = "N", default_value_t = 8)]
    height_inches: u32,

    /// The width in pixels of the chromosome name column on the left.
    #[arg(short = 'T', long = "text-width", value_name = "N", default_value_t = 100)]
    text_width: u32,

    // Coloring Options
    /// Opacity of the phase block fills.
    #[arg(short = 'a', long = "alpha", value_name = "FLOAT", default_value_t = 0.2)]
    alpha: f64,

    /// Read per-chromosome RGB colors from FILE.
    #[arg(short = 'F', long = "block-colors", value_name = "FILE")]
    block_colors: Option<PathBuf>,

    /// Color each chromosome's blocks by a hash of its name.
    #[arg(short = 's', long = "color-by-name")]
    color_by_name: bool,

    // Name Viz Options
    /// Hide the chromosome names on the left of the generated image.
    #[arg(short = 'H', long = "hide-names")]
    hide_names: bool,

    // Logging
    /// Verbosity level (0 = error, 1 = info, 2 = debug).
    #[arg(short = 'v', long = "verbose", value_name = "N", default_value_t = 1)]
    verbose: u8,
}

#[derive(Error, Debug)]
enum PlotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("input has {0} lines; expected name/boundary line pairs")]
    UnpairedLines(usize),
    #[error("line {0}: failed to parse boundary '{1}'")]
    BadBoundary(usize, String),
    #[error("line {0}: odd number of boundaries; expected start/end pairs")]
    UnpairedBoundaries(usize),
    #[error("no usable chromosome records in input")]
    EmptyInput,
    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

/// One chromosome's name and phase block boundaries
#[derive(Debug, Clone)]
struct ChromRecord {
    name: String,
    boundaries: Vec<u64>,
}

impl ChromRecord {
    /// The drawn extent of the chromosome: its rightmost block boundary.
    fn length(&self) -> u64 {
        self.boundaries.iter().copied().max().unwrap_or(0)
    }

    /// Block (start, end) pairs in file order, including degenerate ones.
    fn blocks(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.boundaries.chunks_exact(2).map(|pair| (pair[0], pair[1]))
    }
}

/// Canvas geometry derived once per run from the record set.
#[derive(Debug, Clone, Copy)]
struct Layout {
    total_height: u32,
    total_width: u32,
    text_width: u32,
    chr_height: u32,
    space_height: u32,
    max_chr_length: u64,
    x_scale: f64,
    canvas_width: u32,
}

/// Fraction of the canvas height occupied by chromosome bars; the rest is
/// split evenly into the gaps above, between, and below them.
const OCCUPIED_PROPORTION: f64 = 0.8;

const RIGHT_PADDING: u32 = 30;

impl Layout {
    fn compute(args: &Args, records: &[ChromRecord]) -> Result<Layout, PlotError> {
        let chr_count = records.len() as u32;
        let max_chr_length = records.iter().map(|r| r.length()).max().unwrap_or(0);
        if chr_count == 0 || max_chr_length == 0 {
            return Err(PlotError::EmptyInput);
        }

        let total_height = args.pixels_per_inch * args.height_inches;
        let total_width = args.pixels_per_inch * args.width_inches + args.text_width;
        let occupied = (total_height as f64 * OCCUPIED_PROPORTION) as u32;
        let chr_height = occupied / chr_count;
        let space_height = (total_height - occupied) / (chr_count + 1);
        let x_scale = total_width as f64 / max_chr_length as f64;

        Ok(Layout {
            total_height,
            total_width,
            text_width: args.text_width,
            chr_height,
            space_height,
            max_chr_length,
            x_scale,
            canvas_width: args.text_width + total_width + RIGHT_PADDING,
        })
    }
}

/// 5x8 bitmap font (matching odgi's font5x8.h)
const FONT_5X8: [[u8; 8]; 128] = {
    let mut font = [[0u8; 8]; 128];
    font[b' ' as usize] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
    font[b'!' as usize] = [0x20, 0x20, 0x20, 0x20, 0x20, 0x00, 0x20, 0x00];
    font[b'"' as usize] = [0x50, 0x50, 0x50, 0x00, 0x00, 0x00, 0x00, 0x00];
    font[b'#' as usize] = [0x50, 0x50, 0xF8, 0x50, 0xF8, 0x50, 0x50, 0x00];
    font[b'$' as usize] = [0x20, 0x78, 0xA0, 0x70, 0x28, 0xF0, 0x20, 0x00];
    font[b'%' as usize] = [0xC0, 0xC8, 0x10, 0x20, 0x40, 0x98, 0x18, 0x00];
    font[b'&' as usize] = [0x40, 0xA0, 0xA0, 0x40, 0xA8, 0x90, 0x68, 0x00];
    font[b'\'' as usize] = [0x20, 0x20, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00];
    font[b'(' as usize] = [0x10, 0x20, 0x40, 0x40, 0x40, 0x20, 0x10, 0x00];
    font[b')' as usize] = [0x40, 0x20, 0x10, 0x10, 0x10, 0x20, 0x40, 0x00];
    font[b'*' as usize] = [0x00, 0x20, 0xA8, 0x70, 0xA8, 0x20, 0x00, 0x00];
    font[b'+' as usize] = [0x00, 0x20, 0x20, 0xF8, 0x20, 0x20, 0x00, 0x00];
    font[b',' as usize] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x20, 0x20, 0x40];
    font[b'-' as usize] = [0x00, 0x00, 0x00, 0xF8, 0x00, 0x00, 0x00, 0x00];
    font[b'.' as usize] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x20, 0x20, 0x00];
    font[b'/' as usize] = [0x00, 0x08, 0x10, 0x20, 0x40, 0x80, 0x00, 0x00];
    font[b'0' as usize] = [0x70, 0x88, 0x98, 0xA8, 0xC8, 0x88, 0x70, 0x00];
    font[b'1' as usize] = [0x20, 0x60, 0x20, 0x20, 0x20, 0x20, 0x70, 0x00];
    font[b'2' as usize] = [0x70, 0x88, 0x08, 0x30, 0x40, 0x80, 0xF8, 0x00];
    font[b'3' as usize] = [0xF8, 0x10, 0x20, 0x10, 0x08, 0x88, 0x70, 0x00];
    font[b'4' as usize] = [0x10, 0x30, 0x50, 0x90, 0xF8, 0x10, 0x10, 0x00];
    font[b'5' as usize] = [0xF8, 0x80, 0xF0, 0x08, 0x08, 0x88, 0x70, 0x00];
    font[b'6' as usize] = [0x30, 0x40, 0x80, 0xF0, 0x88, 0x88, 0x70, 0x00];
    font[b'7' as usize] = [0xF8, 0x08, 0x10, 0x20, 0x40, 0x40, 0x40, 0x00];
    font[b'8' as usize] = [0x70, 0x88, 0x88, 0x70, 0x88, 0x88, 0x70, 0x00];
    font[b'9' as usize] = [0x70, 0x88, 0x88, 0x78, 0x08, 0x10, 0x60, 0x00];
    font[b':' as usize] = [0x00, 0x00, 0x20, 0x00, 0x00, 0x20, 0x00, 0x00];
    font[b';' as usize] = [0x00, 0x00, 0x20, 0x00, 0x00, 0x20, 0x20, 0x40];
    font[b'<' as usize] = [0x08, 0x10, 0x20, 0x40, 0x20, 0x10, 0x08, 0x00];
    font[b'=' as usize] = [0x00, 0x00, 0xF8, 0x00, 0xF8, 0x00, 0x00, 0x00];
    font[b'>' as usize] = [0x80, 0x40, 0x20, 0x10, 0x20, 0x40, 0x80, 0x00];
    font[b'?' as usize] = [0x70, 0x88, 0x08, 0x10, 0x20, 0x00, 0x20, 0x00];
    font[b'@' as usize] = [0x70, 0x88, 0xB8, 0xA8, 0xB8, 0x80, 0x70, 0x00];
    font[b'A' as usize] = [0x70, 0x88, 0x88, 0xF8, 0x88, 0x88, 0x88, 0x00];
    font[b'B' as usize] = [0xF0, 0x88, 0x88, 0xF0, 0x88, 0x88, 0xF0, 0x00];
    font[b'C' as usize] = [0x70, 0x88, 0x80, 0x80, 0x80, 0x88, 0x70, 0x00];
    font[b'D' as usize] = [0xE0, 0x90, 0x88, 0x88, 0x88, 0x90, 0xE0, 0x00];
    font[b'E' as usize] = [0xF8, 0x80, 0x80, 0xF0, 0x80, 0x80, 0xF8, 0x00];
    font[b'F' as usize] = [0xF8, 0x80, 0x80, 0xF0, 0x80, 0x80, 0x80, 0x00];
    font[b'G' as usize] = [0x70, 0x88, 0x80, 0xB8, 0x88, 0x88, 0x70, 0x00];
    font[b'H' as usize] = [0x88, 0x88, 0x88, 0xF8, 0x88, 0x88, 0x88, 0x00];
    font[b'I' as usize] = [0x70, 0x20, 0x20, 0x20, 0x20, 0x20, 0x70, 0x00];
    font[b'J' as usize] = [0x38, 0x10, 0x10, 0x10, 0x10, 0x90, 0x60, 0x00];
    font[b'K' as usize] = [0x88, 0x90, 0xA0, 0xC0, 0xA0, 0x90, 0x88, 0x00];
    font[b'L' as usize] = [0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0xF8, 0x00];
    font[b'M' as usize] = [0x88, 0xD8, 0xA8, 0xA8, 0x88, 0x88, 0x88, 0x00];
    font[b'N' as usize] = [0x88, 0xC8, 0xA8, 0x98, 0x88, 0x88, 0x88, 0x00];
    font[b'O' as usize] = [0x70, 0x88, 0x88, 0x88, 0x88, 0x88, 0x70, 0x00];
    font[b'P' as usize] = [0xF0, 0x88, 0x88, 0xF0, 0x80, 0x80, 0x80, 0x00];
    font[b'Q' as usize] = [0x70, 0x88, 0x88, 0x88, 0xA8, 0x90, 0x68, 0x00];
    font[b'R' as usize] = [0xF0, 0x88, 0x88, 0xF0, 0xA0, 0x90, 0x88, 0x00];
    font[b'S' as usize] = [0x70, 0x88, 0x80, 0x70, 0x08, 0x88, 0x70, 0x00];
    font[b'T' as usize] = [0xF8, 0x20, 0x20, 0x20, 0x20, 0x20, 0x20, 0x00];
    font[b'U' as usize] = [0x88, 0x88, 0x88, 0x88, 0x88, 0x88, 0x70, 0x00];
    font[b'V' as usize] = [0x88, 0x88, 0x88, 0x88, 0x88, 0x50, 0x20, 0x00];
    font[b'W' as usize] = [0x88, 0x88, 0x88, 0xA8, 0xA8, 0xD8, 0x88, 0x00];
    font[b'X' as usize] = [0x88, 0x88, 0x50, 0x20, 0x50, 0x88, 0x88, 0x00];
    font[b'Y' as usize] = [0x88, 0x88, 0x50, 0x20, 0x20, 0x20, 0x20, 0x00];
    font[b'Z' as usize] = [0xF8, 0x08, 0x10, 0x20, 0x40, 0x80, 0xF8, 0x00];
    font[b'[' as usize] = [0x70, 0x40, 0x40, 0x40, 0x40, 0x40, 0x70, 0x00];
    font[b'\\' as usize] = [0x00, 0x80, 0x40, 0x20, 0x10, 0x08, 0x00, 0x00];
    font[b']' as usize] = [0x70, 0x10, 0x10, 0x10, 0x10, 0x10, 0x70, 0x00];
    font[b'^' as usize] = [0x20, 0x50, 0x88, 0x00, 0x00, 0x00, 0x00, 0x00];
    font[b'_' as usize] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF8, 0x00];
    font[b'`' as usize] = [0x40, 0x20, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00];
    font[b'a' as usize] = [0x00, 0x00, 0x70, 0x08, 0x78, 0x88, 0x78, 0x00];
    font[b'b' as usize] = [0x80, 0x80, 0xB0, 0xC8, 0x88, 0x88, 0xF0, 0x00];
    font[b'c' as usize] = [0x00, 0x00, 0x70, 0x80, 0x80, 0x88, 0x70, 0x00];
    font[b'd' as usize] = [0x08, 0x08, 0x68, 0x98, 0x88, 0x88, 0x78, 0x00];
    font[b'e' as usize] = [0x00, 0x00, 0x70, 0x88, 0xF8, 0x80, 0x70, 0x00];
    font[b'f' as usize] = [0x30, 0x48, 0x40, 0xE0, 0x40, 0x40, 0x40, 0x00];
    font[b'g' as usize] = [0x00, 0x00, 0x78, 0x88, 0x78, 0x08, 0x70, 0x00];
    font[b'h' as usize] = [0x80, 0x80, 0xB0, 0xC8, 0x88, 0x88, 0x88, 0x00];
    font[b'i' as usize] = [0x20, 0x00, 0x60, 0x20, 0x20, 0x20, 0x70, 0x00];
    font[b'j' as usize] = [0x10, 0x00, 0x30, 0x10, 0x10, 0x90, 0x60, 0x00];
    font[b'k' as usize] = [0x80, 0x80, 0x90, 0xA0, 0xC0, 0xA0, 0x90, 0x00];
    font[b'l' as usize] = [0x60, 0x20, 0x20, 0x20, 0x20, 0x20, 0x70, 0x00];
    font[b'm' as usize] = [0x00, 0x00, 0xD0, 0xA8, 0xA8, 0xA8, 0xA8, 0x00];
    font[b'n' as usize] = [0x00, 0x00, 0xB0, 0xC8, 0x88, 0x88, 0x88, 0x00];
    font[b'o' as usize] = [0x00, 0x00, 0x70, 0x88, 0x88, 0x88, 0x70, 0x00];
    font[b'p' as usize] = [0x00, 0x00, 0xF0, 0x88, 0xF0, 0x80, 0x80, 0x00];
    font[b'q' as usize] = [0x00, 0x00, 0x78, 0x88, 0x78, 0x08, 0x08, 0x00];
    font[b'r' as usize] = [0x00, 0x00, 0xB0, 0xC8, 0x80, 0x80, 0x80, 0x00];
    font[b's' as usize] = [0x00, 0x00, 0x70, 0x80, 0x70, 0x08, 0xF0, 0x00];
    font[b't' as usize] = [0x40, 0x40, 0xE0, 0x40, 0x40, 0x48, 0x30, 0x00];
    font[b'u' as usize] = [0x00, 0x00, 0x88, 0x88, 0x88, 0x98, 0x68, 0x00];
    font[b'v' as usize] = [0x00, 0x00, 0x88, 0x88, 0x88, 0x50, 0x20, 0x00];
    font[b'w' as usize] = [0x00, 0x00, 0x88, 0x88, 0xA8, 0xA8, 0x50, 0x00];
    font[b'x' as usize] = [0x00, 0x00, 0x88, 0x50, 0x20, 0x50, 0x88, 0x00];
    font[b'y' as usize] = [0x00, 0x00, 0x88, 0x88, 0x78, 0x08, 0x70, 0x00];
    font[b'z' as usize] = [0x00, 0x00, 0xF8, 0x10, 0x20, 0x40, 0xF8, 0x00];
    font[b'{' as usize] = [0x10, 0x20, 0x20, 0x40, 0x20, 0x20, 0x10, 0x00];
    font[b'|' as usize] = [0x20, 0x20, 0x20, 0x20, 0x20, 0x20, 0x20, 0x00];
    font[b'}' as usize] = [0x40, 0x20, 0x20, 0x10, 0x20, 0x20, 0x40, 0x00];
    font[b'~' as usize] = [0x00, 0x00, 0x40, 0xA8, 0x10, 0x00, 0x00, 0x00];
    font
};

const TRAILING_DOTS: [u8; 8] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xA8, 0x00];

/// Cyclic palette for phase block fills, indexed by block pair position.
const BLOCK_PALETTE: [(u8, u8, u8); 6] = [
    (255, 0, 0),   // red
    (255, 165, 0), // orange
    (255, 255, 0), // yellow
    (0, 128, 0),   // green
    (0, 0, 255),   // blue
    (128, 0, 128), // purple
];

fn block_color(pair_idx: usize) -> (u8, u8, u8) {
    BLOCK_PALETTE[pair_idx % BLOCK_PALETTE.len()]
}

/// Parse a phase block file: alternating name lines and boundary lines.
fn parse_blocks(path: &PathBuf) -> Result<Vec<ChromRecord>, PlotError> {
    info!("Loading phase block file...");

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines: Vec<String> = Vec::new();
    for line in reader.lines() {
        lines.push(line?);
    }

    // Blank lines are tolerated at end-of-file only
    while lines.last().map_or(false, |l| l.trim().is_empty()) {
        lines.pop();
    }

    if lines.len() % 2 != 0 {
        return Err(PlotError::UnpairedLines(lines.len()));
    }

    let mut records = Vec::new();
    for (pair_idx, pair) in lines.chunks_exact(2).enumerate() {
        let name = pair[0].trim_end();
        // An empty name line consumes the pair without emitting a record
        if name.is_empty() {
            continue;
        }

        let line_no = pair_idx * 2 + 2;
        let mut boundaries = Vec::new();
        for token in pair[1].split_whitespace() {
            let value: u64 = token
                .parse()
                .map_err(|_| PlotError::BadBoundary(line_no, token.to_string()))?;
            boundaries.push(value);
        }
        if boundaries.len() % 2 != 0 {
            return Err(PlotError::UnpairedBoundaries(line_no));
        }

        records.push(ChromRecord {
            name: name.to_string(),
            boundaries,
        });
    }

    Ok(records)
}

/// Deterministic per-chromosome color derived from a SHA256 of the name.
fn compute_name_color(name: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();

    let mut r = digest[24] as f32 / 255.0;
    let mut g = digest[8] as f32 / 255.0;
    let mut b = digest[16] as f32 / 255.0;

    // Normalize by sum, then brighten the dominant channel
    let sum = r + g + b;
    if sum > 0.0 {
        r /= sum;
        g /= sum;
        b /= sum;
    }
    let max_component = r.max(g).max(b);
    let f = if max_component > 0.0 {
        1.5f32.min(1.0 / max_component)
    } else {
        1.0
    };

    (
        (255.0 * (r * f).min(1.0)).round() as u8,
        (255.0 * (g * f).min(1.0)).round() as u8,
        (255.0 * (b * f).min(1.0)).round() as u8,
    )
}

/// Read per-chromosome colors from a TSV of name and "#rrggbb" or "r,g,b" values.
fn load_block_colors(path: &PathBuf) -> Result<FxHashMap<String, (u8, u8, u8)>, PlotError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut colors = FxHashMap::default();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 2 {
            continue;
        }
        let name = parts[0].to_string();
        let color_str = parts[1];

        let rgb = if let Some(hex) = color_str.strip_prefix('#') {
            if hex.len() >= 6 {
                let r = u8::from_str_radix(&hex[0..2], 16).unwrap_or(0);
                let g = u8::from_str_radix(&hex[2..4], 16).unwrap_or(0);
                let b = u8::from_str_radix(&hex[4..6], 16).unwrap_or(0);
                (r, g, b)
            } else {
                (128, 128, 128)
            }
        } else {
            let channels: Vec<u8> = color_str
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if channels.len() == 3 {
                (channels[0], channels[1], channels[2])
            } else {
                (128, 128, 128)
            }
        };

        colors.insert(name, rgb);
    }

    Ok(colors)
}

/// Pick the fill color for one block: explicit override, then name hash,
/// then the cyclic palette.
fn fill_color(
    record: &ChromRecord,
    pair_idx: usize,
    custom: Option<&FxHashMap<String, (u8, u8, u8)>>,
    color_by_name: bool,
) -> (u8, u8, u8) {
    if let Some(colors) = custom {
        if let Some(&rgb) = colors.get(&record.name) {
            return rgb;
        }
    }
    if color_by_name {
        return compute_name_color(record.name.as_str());
    }
    block_color(pair_idx)
}

fn blend(dst: u8, src: u8, alpha: f64) -> u8 {
    (alpha * src as f64 + (1.0 - alpha) * dst as f64).round() as u8
}

fn set_pixel(buffer: &mut [u8], width: u32, x: u32, y: u32, r: u8, g: u8, b: u8) {
    if x >= width {
        return;
    }
    let idx = ((y * width + x) * 3) as usize;
    if idx + 2 < buffer.len() {
        buffer[idx] = r;
        buffer[idx + 1] = g;
        buffer[idx + 2] = b;
    }
}

/// Alpha-blend a filled rectangle over whatever is already on the canvas.
fn blend_rect(
    buffer: &mut [u8],
    width: u32,
    x0: u32,
    y0: u32,
    w: u32,
    h: u32,
    r: u8,
    g: u8,
    b: u8,
    alpha: f64,
) {
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            if x >= width {
                break;
            }
            let idx = ((y * width + x) * 3) as usize;
            if idx + 2 < buffer.len() {
                buffer[idx] = blend(buffer[idx], r, alpha);
                buffer[idx + 1] = blend(buffer[idx + 1], g, alpha);
                buffer[idx + 2] = blend(buffer[idx + 2], b, alpha);
            }
        }
    }
}

/// 1-px unfilled rectangle outline.
fn stroke_rect(buffer: &mut [u8], width: u32, x0: u32, y0: u32, w: u32, h: u32, r: u8, g: u8, b: u8) {
    if w == 0 || h == 0 {
        return;
    }
    for x in x0..x0 + w {
        set_pixel(buffer, width, x, y0, r, g, b);
        set_pixel(buffer, width, x, y0 + h - 1, r, g, b);
    }
    for y in y0..y0 + h {
        set_pixel(buffer, width, x0, y, r, g, b);
        set_pixel(buffer, width, x0 + w - 1, y, r, g, b);
    }
}

fn write_char(
    buffer: &mut [u8],
    width: u32,
    base_x: u32,
    base_y: u32,
    char_data: &[u8; 8],
    char_size: u32,
    r: u8,
    g: u8,
    b: u8,
) {
    let ratio = char_size / 8;
    for j in 0..8u32 {
        let row = char_data[j as usize];
        let y = base_y + j * ratio;
        for z in (0..8i32).rev() {
            if (row >> z) & 1 == 1 {
                let x = base_x + (7 - z as u32) * ratio;
                for rx in 0..ratio {
                    for ry in 0..ratio {
                        set_pixel(buffer, width, x + rx, y + ry, r, g, b);
                    }
                }
            }
        }
    }
}

/// Draw a chromosome name in the label column, vertically centered on its bar.
fn draw_name(
    buffer: &mut [u8],
    width: u32,
    name: &str,
    bar_top: u32,
    chr_height: u32,
    char_size: u32,
    max_chars: usize,
) {
    let name_len = name.chars().count();
    let num_chars = name_len.min(max_chars);
    let too_long = name_len > num_chars;
    let base_y = (bar_top + chr_height / 2).saturating_sub(char_size / 2);

    for (i, c) in name.chars().take(num_chars).enumerate() {
        let base_x = i as u32 * char_size;
        let char_data = if i == num_chars - 1 && too_long {
            &TRAILING_DOTS
        } else {
            let c_byte = c as usize;
            if c_byte < 128 {
                &FONT_5X8[c_byte]
            } else {
                &FONT_5X8[b'?' as usize]
            }
        };
        write_char(buffer, width, base_x, base_y, char_data, char_size, 0, 0, 0);
    }
}

/// Render the chromosome bars into a white RGB buffer.
fn render(
    args: &Args,
    layout: &Layout,
    records: &[ChromRecord],
    custom: Option<&FxHashMap<String, (u8, u8, u8)>>,
) -> Vec<u8> {
    let cw = layout.canvas_width;
    let mut buffer = vec![255u8; (cw * layout.total_height * 3) as usize];

    let char_size = ((layout.chr_height / 8) * 8).clamp(8, 24);
    let max_chars = (layout.text_width / char_size) as usize;

    let mut bar_top = layout.space_height;
    for record in records {
        let bar_width = (layout.x_scale * record.length() as f64) as u32;

        // Block fills go down first; the bar outline is drawn over them
        for (pair_idx, (start, end)) in record.blocks().enumerate() {
            if end <= start {
                continue;
            }
            let (r, g, b) = fill_color(record, pair_idx, custom, args.color_by_name);
            let x = layout.text_width + (start as f64 * layout.x_scale) as u32;
            let w = ((end - start) as f64 * layout.x_scale) as u32;
            if layout.chr_height > 2 {
                blend_rect(
                    &mut buffer,
                    cw,
                    x,
                    bar_top + 1,
                    w,
                    layout.chr_height - 2,
                    r,
                    g,
                    b,
                    args.alpha,
                );
            }
        }

        stroke_rect(
            &mut buffer,
            cw,
            layout.text_width,
            bar_top,
            bar_width,
            layout.chr_height,
            0,
            0,
            0,
        );

        if !args.hide_names && max_chars > 0 {
            draw_name(
                &mut buffer,
                cw,
                &record.name,
                bar_top,
                layout.chr_height,
                char_size,
                max_chars,
            );
        }

        bar_top += layout.chr_height + layout.space_height;
    }

    buffer
}

/// Escape special XML characters
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Render the chromosome bars as SVG with vector fonts.
fn render_svg(
    args: &Args,
    layout: &Layout,
    records: &[ChromRecord],
    custom: Option<&FxHashMap<String, (u8, u8, u8)>>,
) -> String {
    let font_size = (layout.chr_height as f64 * 0.8).clamp(8.0, 19.0);

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}" viewBox="0 0 {} {}">
<style>
  .chrom-name {{ font-family: 'DejaVu Sans Mono', 'Courier New', monospace; font-size: {}px; }}
</style>
<rect width="100%" height="100%" fill="white"/>
"#,
        layout.canvas_width, layout.total_height, layout.canvas_width, layout.total_height, font_size
    ));

    let mut bar_top = layout.space_height;
    for record in records {
        let bar_width = (layout.x_scale * record.length() as f64) as u32;

        for (pair_idx, (start, end)) in record.blocks().enumerate() {
            if end <= start {
                continue;
            }
            let (r, g, b) = fill_color(record, pair_idx, custom, args.color_by_name);
            let x = layout.text_width as f64 + start as f64 * layout.x_scale;
            let w = (end - start) as f64 * layout.x_scale;
            svg.push_str(&format!(
                r#"<rect x="{:.1}" y="{}" width="{:.1}" height="{}" fill="rgb({},{},{})" fill-opacity="{}"/>"#,
                x,
                bar_top + 1,
                w,
                layout.chr_height.saturating_sub(2),
                r,
                g,
                b,
                args.alpha
            ));
            svg.push('\n');
        }

        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="{}" height="{}" fill="none" stroke="black" stroke-width="1"/>"#,
            layout.text_width, bar_top, bar_width, layout.chr_height
        ));
        svg.push('\n');

        if !args.hide_names {
            let text_y = bar_top as f64 + layout.chr_height as f64 / 2.0 + font_size / 3.0;
            svg.push_str(&format!(
                r#"<text x="2" y="{:.1}" class="chrom-name" fill="black">{}</text>"#,
                text_y,
                escape_xml(&record.name)
            ));
            svg.push('\n');
        }

        bar_top += layout.chr_height + layout.space_height;
    }

    svg.push_str("</svg>\n");
    svg
}

fn save_raster(out: &PathBuf, layout: &Layout, buffer: Vec<u8>) -> Result<(), PlotError> {
    let img = image::RgbImage::from_raw(layout.canvas_width, layout.total_height, buffer)
        .ok_or_else(|| {
            PlotError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "pixel buffer does not match canvas dimensions",
            ))
        })?;
    img.save(out)?;
    Ok(())
}

fn run(args: &Args) -> Result<(), PlotError> {
    let records = parse_blocks(&args.input)?;
    info!("Number of chromosomes: {}", records.len());

    let layout = Layout::compute(args, &records)?;
    info!("Maximum chromosome length: {} bp", layout.max_chr_length);
    for record in &records {
        debug!("{}: {} bp", record.name, record.length());
    }

    let custom = match &args.block_colors {
        Some(path) => Some(load_block_colors(path)?),
        None => None,
    };

    let is_svg = args
        .out
        .extension()
        .map(|ext| ext.to_ascii_lowercase() == "svg")
        .unwrap_or(false);

    info!("Saving to {:?}...", args.out);

    if is_svg {
        let svg = render_svg(args, &layout, &records, custom.as_ref());
        let mut file = File::create(&args.out)?;
        file.write_all(svg.as_bytes())?;
    } else {
        let buffer = render(args, &layout, &records, custom.as_ref());
        save_raster(&args.out, &layout, buffer)?;
    }

    info!("Done.");
    Ok(())
}

fn main() {
    let args = Args::parse();

    // Initialize logger based on verbosity
    env_logger::Builder::new()
        .filter_level(match args.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_args() -> Args {
        Args::parse_from(["phaselook", "-i", "blocks.txt", "-o", "blocks.png"])
    }

    fn write_input(dir: &std::path::Path, content: &str) -> PathBuf {
        let path = dir.join("blocks.txt");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn record(name: &str, boundaries: &[u64]) -> ChromRecord {
        ChromRecord {
            name: name.to_string(),
            boundaries: boundaries.to_vec(),
        }
    }

    fn pixel(buffer: &[u8], width: u32, x: u32, y: u32) -> [u8; 3] {
        let idx = ((y * width + x) * 3) as usize;
        [buffer[idx], buffer[idx + 1], buffer[idx + 2]]
    }

    #[test]
    fn parse_pairs_of_lines() {
        let dir = tempdir().unwrap();
        let path = write_input(dir.path(), "chr1\n0 100 150 300\nchr2\n10 20\n");
        let records = parse_blocks(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "chr1");
        assert_eq!(records[0].boundaries, vec![0, 100, 150, 300]);
        assert_eq!(records[0].length(), 300);
        assert_eq!(records[1].name, "chr2");
        assert_eq!(records[1].length(), 20);
    }

    #[test]
    fn parse_skips_empty_name_pairs() {
        let dir = tempdir().unwrap();
        let path = write_input(dir.path(), "chr1\n0 100\n\n5 10\nchr3\n0 50\n");
        let records = parse_blocks(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "chr1");
        assert_eq!(records[1].name, "chr3");
    }

    #[test]
    fn parse_tolerates_trailing_blank_lines() {
        let dir = tempdir().unwrap();
        let path = write_input(dir.path(), "chr1\n0 100\n\n\n");
        let records = parse_blocks(&path).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn parse_rejects_odd_line_count() {
        let dir = tempdir().unwrap();
        let path = write_input(dir.path(), "chr1\n0 100\nchr2\n");
        let err = parse_blocks(&path).unwrap_err();
        assert!(matches!(err, PlotError::UnpairedLines(3)));
    }

    #[test]
    fn parse_rejects_non_integer_boundary() {
        let dir = tempdir().unwrap();
        let path = write_input(dir.path(), "chr1\n0 abc\n");
        let err = parse_blocks(&path).unwrap_err();
        assert!(matches!(err, PlotError::BadBoundary(2, ref t) if t == "abc"));
    }

    #[test]
    fn parse_rejects_odd_boundary_count() {
        let dir = tempdir().unwrap();
        let path = write_input(dir.path(), "chr1\n0 100 200\n");
        let err = parse_blocks(&path).unwrap_err();
        assert!(matches!(err, PlotError::UnpairedBoundaries(2)));
    }

    #[test]
    fn layout_heights_fill_canvas() {
        let args = test_args();
        for n in [1usize, 3, 10, 24] {
            let records: Vec<ChromRecord> = (0..n)
                .map(|i| record(&format!("chr{}", i), &[0, 1000]))
                .collect();
            let layout = Layout::compute(&args, &records).unwrap();
            let used = layout.chr_height * n as u32 + layout.space_height * (n as u32 + 1);
            assert!(used <= layout.total_height);
            // Each integer division drops less than one pixel per part
            assert!(layout.total_height - used < 2 * n as u32 + 2);
        }
    }

    #[test]
    fn layout_scale_spans_width() {
        let args = test_args();
        let records = vec![record("chr1", &[0, 12345])];
        let layout = Layout::compute(&args, &records).unwrap();
        assert_eq!(layout.max_chr_length, 12345);
        let spanned = layout.x_scale * layout.max_chr_length as f64;
        assert!((spanned - layout.total_width as f64).abs() < 1e-6);
    }

    #[test]
    fn layout_rejects_empty_input() {
        let args = test_args();
        assert!(matches!(
            Layout::compute(&args, &[]),
            Err(PlotError::EmptyInput)
        ));
        // An all-zero boundary set gives a zero maximum length, just as unusable
        let records = vec![record("chr1", &[0, 0])];
        assert!(matches!(
            Layout::compute(&args, &records),
            Err(PlotError::EmptyInput)
        ));
    }

    #[test]
    fn palette_cycles_every_six() {
        assert_eq!(block_color(0), (255, 0, 0));
        assert_eq!(block_color(1), (255, 165, 0));
        assert_eq!(block_color(5), (128, 0, 128));
        assert_eq!(block_color(6), block_color(0));
        assert_eq!(block_color(13), block_color(1));
    }

    #[test]
    fn name_color_is_deterministic() {
        assert_eq!(compute_name_color("chr1"), compute_name_color("chr1"));
        assert_ne!(compute_name_color("chr1"), compute_name_color("chr2"));
    }

    #[test]
    fn render_draws_outline_and_blended_fills() {
        let args = test_args();
        let records = vec![record("chr1", &[0, 100, 150, 300])];
        let layout = Layout::compute(&args, &records).unwrap();
        let buffer = render(&args, &layout, &records, None);
        let cw = layout.canvas_width;

        let top = layout.space_height;
        let mid_y = top + layout.chr_height / 2;

        // Outline corner is black
        assert_eq!(pixel(&buffer, cw, layout.text_width, top), [0, 0, 0]);

        // Inside the first block: red at alpha 0.2 over white
        let x1 = layout.text_width + (50.0 * layout.x_scale) as u32;
        assert_eq!(pixel(&buffer, cw, x1, mid_y), [255, 204, 204]);

        // Inside the second block: orange at alpha 0.2 over white
        let x2 = layout.text_width + (200.0 * layout.x_scale) as u32;
        assert_eq!(pixel(&buffer, cw, x2, mid_y), [255, 237, 204]);

        // The gap between the two blocks stays white
        let xg = layout.text_width + (125.0 * layout.x_scale) as u32;
        assert_eq!(pixel(&buffer, cw, xg, mid_y), [255, 255, 255]);
    }

    #[test]
    fn zero_width_blocks_draw_nothing() {
        let args = Args::parse_from([
            "phaselook",
            "-i",
            "blocks.txt",
            "-o",
            "blocks.png",
            "--hide-names",
        ]);
        let records = vec![record("chrA", &[0, 0]), record("chrB", &[0, 100])];
        let layout = Layout::compute(&args, &records).unwrap();
        let buffer = render(&args, &layout, &records, None);
        let cw = layout.canvas_width;

        // chrA has length zero: no fill and no outline anywhere in its rows
        let top = layout.space_height;
        for y in top..top + layout.chr_height {
            for x in layout.text_width..cw {
                assert_eq!(pixel(&buffer, cw, x, y), [255, 255, 255]);
            }
        }
    }

    #[test]
    fn render_is_deterministic() {
        let args = test_args();
        let records = vec![
            record("chr1", &[0, 100, 150, 300]),
            record("chr2", &[50, 250]),
        ];
        let layout = Layout::compute(&args, &records).unwrap();
        let first = render(&args, &layout, &records, None);
        let second = render(&args, &layout, &records, None);
        assert_eq!(first, second);
    }

    #[test]
    fn block_colors_file_overrides_palette() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("colors.tsv");
        std::fs::write(&path, "# overrides\nchr1\t#00ff00\nchr2\t10,20,30\n").unwrap();
        let colors = load_block_colors(&path).unwrap();
        assert_eq!(colors.get("chr1"), Some(&(0, 255, 0)));
        assert_eq!(colors.get("chr2"), Some(&(10, 20, 30)));

        let rec = record("chr1", &[0, 100]);
        assert_eq!(fill_color(&rec, 0, Some(&colors), false), (0, 255, 0));
        // A chromosome without an override falls back to the palette
        let other = record("chrX", &[0, 100]);
        assert_eq!(fill_color(&other, 1, Some(&colors), false), block_color(1));
    }

    #[test]
    fn svg_output_contains_labels_and_rects() {
        let args = test_args();
        let records = vec![record("chr1", &[0, 100, 150, 300])];
        let layout = Layout::compute(&args, &records).unwrap();
        let svg = render_svg(&args, &layout, &records, None);
        assert!(svg.starts_with("<?xml"));
        assert!(svg.contains(">chr1</text>"));
        assert!(svg.contains("fill-opacity"));
        assert!(svg.contains(r#"stroke="black""#));
        assert!(svg.trim_end().ends_with("</svg>"));
    }

    #[test]
    fn writes_png_end_to_end() {
        let dir = tempdir().unwrap();
        let input = write_input(dir.path(), "chr1\n0 100 150 300\nchr2\n0 250\n");
        let out = dir.path().join("blocks.png");
        let args = Args::parse_from([
            "phaselook",
            "-i",
            input.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
        ]);
        run(&args).unwrap();

        let records = parse_blocks(&args.input).unwrap();
        let layout = Layout::compute(&args, &records).unwrap();
        let img = image::open(&out).unwrap();
        assert_eq!(img.width(), layout.canvas_width);
        assert_eq!(img.height(), layout.total_height);
    }

    #[test]
    fn empty_input_writes_no_output() {
        let dir = tempdir().unwrap();
        let input = write_input(dir.path(), "");
        let out = dir.path().join("blocks.png");
        let args = Args::parse_from([
            "phaselook",
            "-i",
            input.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
        ]);
        assert!(matches!(run(&args), Err(PlotError::EmptyInput)));
        assert!(!out.exists());
    }
}
