//! Packed `0xAARRGGBB` colours and HSV conversion

/// Pack channels into `0xAARRGGBB`
#[inline]
pub const fn argb(alpha: u8, red: u8, green: u8, blue: u8) -> u32 {
    (alpha as u32) << 24 | (red as u32) << 16 | (green as u32) << 8 | blue as u32
}

/// Opaque colour from RGB channels
#[inline]
pub const fn rgb(red: u8, green: u8, blue: u8) -> u32 {
    argb(255, red, green, blue)
}

#[inline]
pub const fn alpha(color: u32) -> u8 {
    (color >> 24) as u8
}

#[inline]
pub const fn red(color: u32) -> u8 {
    (color >> 16) as u8
}

#[inline]
pub const fn green(color: u32) -> u8 {
    (color >> 8) as u8
}

#[inline]
pub const fn blue(color: u32) -> u8 {
    color as u8
}

/// Unpack into `[r, g, b, a]`, the byte order of an RGBA8 pixel
#[inline]
pub const fn to_rgba(color: u32) -> [u8; 4] {
    [red(color), green(color), blue(color), alpha(color)]
}

/// Hue in degrees `[0, 360)`, saturation and value in `[0, 1]`
pub fn to_hsv(color: u32) -> [f64; 3] {
    let r = f64::from(red(color)) / 255.0;
    let g = f64::from(green(color)) / 255.0;
    let b = f64::from(blue(color)) / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    [hue, saturation, max]
}

/// Inverse of [`to_hsv`]; out-of-range inputs are clamped
pub fn from_hsv(alpha: u8, hsv: [f64; 3]) -> u32 {
    let hue = hsv[0].rem_euclid(360.0);
    let saturation = hsv[1].clamp(0.0, 1.0);
    let value = hsv[2].clamp(0.0, 1.0);

    let c = value * saturation;
    let x = c * (1.0 - ((hue / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = value - c;
    let (r, g, b) = match (hue / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let channel = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    argb(alpha, channel(r), channel(g), channel(b))
}
