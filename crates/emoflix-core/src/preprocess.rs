//! Frame preprocessing — RGB normalization and CLAHE on the L*a*b* lightness channel.

use image::{DynamicImage, RgbImage};

const DEFAULT_CLIP_LIMIT: f32 = 2.0;
const DEFAULT_TILES: u32 = 8;

// CIE D65 reference white.
const WHITE_X: f32 = 0.950_47;
const WHITE_Y: f32 = 1.0;
const WHITE_Z: f32 = 1.088_83;

const LAB_DELTA: f32 = 6.0 / 29.0;

/// Contrast-limited adaptive histogram equalization parameters.
///
/// `clip_limit` follows the usual convention: a histogram bin may hold at most
/// `clip_limit × tile_pixels / 256` pixels before the excess is redistributed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClaheParams {
    pub clip_limit: f32,
    /// Tiles per axis (the grid is `tiles × tiles`).
    pub tiles: u32,
}

impl Default for ClaheParams {
    fn default() -> Self {
        Self {
            clip_limit: DEFAULT_CLIP_LIMIT,
            tiles: DEFAULT_TILES,
        }
    }
}

/// Normalize any channel layout to 8-bit RGB and equalize lighting.
pub fn prepare(image: &DynamicImage, params: ClaheParams) -> RgbImage {
    let mut rgb = image.to_rgb8();
    enhance_contrast(&mut rgb, params);
    rgb
}

/// Apply CLAHE to the lightness channel, leaving chroma untouched.
pub fn enhance_contrast(rgb: &mut RgbImage, params: ClaheParams) {
    let (width, height) = rgb.dimensions();
    let labs: Vec<Lab> = rgb.pixels().map(|p| Lab::from_rgb(p.0)).collect();

    let mut lightness: Vec<u8> = labs
        .iter()
        .map(|lab| (lab.l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8)
        .collect();

    clahe(&mut lightness, width, height, params);

    for ((pixel, lab), &l) in rgb.pixels_mut().zip(&labs).zip(&lightness) {
        let adjusted = Lab {
            l: l as f32 * 100.0 / 255.0,
            ..*lab
        };
        pixel.0 = adjusted.to_rgb();
    }
}

/// Contrast-limited adaptive histogram equalization of a single 8-bit plane, in place.
///
/// Builds a clipped-histogram lookup table per tile and blends the four
/// nearest tile tables bilinearly for every pixel. Tile edges are spread
/// evenly when the plane does not divide exactly.
pub fn clahe(plane: &mut [u8], width: u32, height: u32, params: ClaheParams) {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 || plane.len() < w * h {
        return;
    }

    let tiles_x = (params.tiles as usize).clamp(1, w);
    let tiles_y = (params.tiles as usize).clamp(1, h);
    let x_edges: Vec<usize> = (0..=tiles_x).map(|i| i * w / tiles_x).collect();
    let y_edges: Vec<usize> = (0..=tiles_y).map(|i| i * h / tiles_y).collect();

    let mut luts: Vec<[u8; 256]> = Vec::with_capacity(tiles_x * tiles_y);
    for row in 0..tiles_y {
        for col in 0..tiles_x {
            let (x0, x1) = (x_edges[col], x_edges[col + 1]);
            let (y0, y1) = (y_edges[row], y_edges[row + 1]);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for &p in &plane[y * w + x0..y * w + x1] {
                    hist[p as usize] += 1;
                }
            }
            luts.push(tile_lut(&mut hist, (x1 - x0) * (y1 - y0), params.clip_limit));
        }
    }

    let tile_w = w as f32 / tiles_x as f32;
    let tile_h = h as f32 / tiles_y as f32;

    for y in 0..h {
        let (r0, r1, dy) = neighbours(y as f32 / tile_h - 0.5, tiles_y);
        for x in 0..w {
            let (c0, c1, dx) = neighbours(x as f32 / tile_w - 0.5, tiles_x);
            let p = plane[y * w + x] as usize;

            let tl = luts[r0 * tiles_x + c0][p] as f32;
            let tr = luts[r0 * tiles_x + c1][p] as f32;
            let bl = luts[r1 * tiles_x + c0][p] as f32;
            let br = luts[r1 * tiles_x + c1][p] as f32;

            let top = tl * (1.0 - dx) + tr * dx;
            let bottom = bl * (1.0 - dx) + br * dx;
            plane[y * w + x] = (top * (1.0 - dy) + bottom * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Indices of the two tile centres surrounding `pos` (in tile units) and the blend weight.
fn neighbours(pos: f32, tiles: usize) -> (usize, usize, f32) {
    let lower = pos.floor();
    let weight = pos - lower;
    let last = tiles as i64 - 1;
    let i0 = (lower as i64).clamp(0, last) as usize;
    let i1 = (lower as i64 + 1).clamp(0, last) as usize;
    (i0, i1, weight)
}

/// Clip a tile histogram, redistribute the excess, and integrate it into a lookup table.
fn tile_lut(hist: &mut [u32; 256], tile_pixels: usize, clip_limit: f32) -> [u8; 256] {
    if clip_limit > 0.0 {
        let clip = ((clip_limit * tile_pixels as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > clip {
                excess += *bin - clip;
                *bin = clip;
            }
        }

        let redist = excess / 256;
        let residual = (excess % 256) as usize;
        for bin in hist.iter_mut() {
            *bin += redist;
        }
        if residual > 0 {
            let step = (256 / residual).max(1);
            for i in (0..256).step_by(step).take(residual) {
                hist[i] += 1;
            }
        }
    }

    let scale = 255.0 / tile_pixels.max(1) as f32;
    let mut lut = [0u8; 256];
    let mut cumulative = 0u32;
    for (entry, &count) in lut.iter_mut().zip(hist.iter()) {
        cumulative += count;
        *entry = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// CIE L*a*b* colour (D65), L in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lab {
    pub l: f32,
    pub a: f32,
    pub b: f32,
}

impl Lab {
    pub fn from_rgb([r, g, b]: [u8; 3]) -> Self {
        let r = srgb_to_linear(r as f32 / 255.0);
        let g = srgb_to_linear(g as f32 / 255.0);
        let b = srgb_to_linear(b as f32 / 255.0);

        let x = 0.412_456_4 * r + 0.357_576_1 * g + 0.180_437_5 * b;
        let y = 0.212_672_9 * r + 0.715_152_2 * g + 0.072_175_0 * b;
        let z = 0.019_333_9 * r + 0.119_192_0 * g + 0.950_304_1 * b;

        let fx = lab_f(x / WHITE_X);
        let fy = lab_f(y / WHITE_Y);
        let fz = lab_f(z / WHITE_Z);

        Self {
            l: 116.0 * fy - 16.0,
            a: 500.0 * (fx - fy),
            b: 200.0 * (fy - fz),
        }
    }

    pub fn to_rgb(&self) -> [u8; 3] {
        let fy = (self.l + 16.0) / 116.0;
        let fx = fy + self.a / 500.0;
        let fz = fy - self.b / 200.0;

        let x = WHITE_X * lab_f_inv(fx);
        let y = WHITE_Y * lab_f_inv(fy);
        let z = WHITE_Z * lab_f_inv(fz);

        let r = 3.240_454_2 * x - 1.537_138_5 * y - 0.498_531_4 * z;
        let g = -0.969_266_0 * x + 1.876_010_8 * y + 0.041_556_0 * z;
        let b = 0.055_643_4 * x - 0.204_025_9 * y + 1.057_225_2 * z;

        [r, g, b].map(|c| (linear_to_srgb(c.clamp(0.0, 1.0)) * 255.0).round().clamp(0.0, 255.0) as u8)
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn lab_f(t: f32) -> f32 {
    if t > LAB_DELTA.powi(3) {
        t.cbrt()
    } else {
        t / (3.0 * LAB_DELTA * LAB_DELTA) + 4.0 / 29.0
    }
}

fn lab_f_inv(t: f32) -> f32 {
    if t > LAB_DELTA {
        t.powi(3)
    } else {
        3.0 * LAB_DELTA * LAB_DELTA * (t - 4.0 / 29.0)
    }
}
