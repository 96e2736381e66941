use crate::error::EngineError;

/// geohash 的 base32 字母表（不含 a/i/l/o）
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

pub const MAX_PRECISION: usize = 12;

/// 地球半径（米），haversine 计算与测试夹具都依赖这个常量
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

// 每个精度对应的格子尺寸（经度宽 × 纬度高，单位米，赤道处取值）。
// geohash 格子不是正方形，经度方向的宽度随纬度升高而收窄，
// 因此这里的数值是上界；本服务运行纬度下的偏差可以忽略。
const CELL_DIMENSIONS_M: [(f64, f64); MAX_PRECISION] = [
    (5_009_400.0, 4_992_600.0),
    (1_252_300.0, 624_100.0),
    (156_500.0, 156_000.0),
    (39_100.0, 19_500.0),
    (4_890.0, 4_890.0),
    (1_220.0, 610.0),
    (153.0, 153.0),
    (38.2, 19.1),
    (4.77, 4.77),
    (1.19, 0.596),
    (0.149, 0.149),
    (0.0372, 0.0186),
];

/// 两点 geohash 共享长度为 k 的前缀时，间距不超过该精度格子的对角尺寸
pub fn cell_dimensions(precision: usize) -> (f64, f64) {
    CELL_DIMENSIONS_M[precision.clamp(1, MAX_PRECISION) - 1]
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), EngineError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(EngineError::InvalidArgument(format!(
            "纬度超出范围: {}",
            latitude
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(EngineError::InvalidArgument(format!(
            "经度超出范围: {}",
            longitude
        )));
    }
    Ok(())
}

/// 编码经纬度为 geohash 字符串
///
/// 从经度开始交替二分经纬区间，每次二分得到1个比特，
/// 每5个比特映射为1个 base32 字符，累计到 precision 个字符为止。
pub fn encode(latitude: f64, longitude: f64, precision: usize) -> Result<String, EngineError> {
    validate_coordinates(latitude, longitude)?;
    if precision == 0 || precision > MAX_PRECISION {
        return Err(EngineError::InvalidArgument(format!(
            "geohash精度必须在1~{}之间: {}",
            MAX_PRECISION, precision
        )));
    }

    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lng_lo, mut lng_hi) = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut bits = 0usize;
    let mut bit_count = 0u8;
    let mut even = true; // 偶数位二分经度

    while hash.len() < precision {
        if even {
            let mid = (lng_lo + lng_hi) / 2.0;
            if longitude >= mid {
                bits = (bits << 1) | 1;
                lng_lo = mid;
            } else {
                bits <<= 1;
                lng_hi = mid;
            }
        } else {
            let mid = (lat_lo + lat_hi) / 2.0;
            if latitude >= mid {
                bits = (bits << 1) | 1;
                lat_lo = mid;
            } else {
                bits <<= 1;
                lat_hi = mid;
            }
        }
        even = !even;
        bit_count += 1;

        if bit_count == 5 {
            hash.push(BASE32[bits] as char);
            bits = 0;
            bit_count = 0;
        }
    }

    Ok(hash)
}

/// 解码 geohash，返回格子中心点与半格误差 (lat, lng, lat_err, lng_err)
pub fn decode(hash: &str) -> Result<(f64, f64, f64, f64), EngineError> {
    if hash.is_empty() {
        return Err(EngineError::InvalidArgument("geohash不能为空".to_string()));
    }

    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lng_lo, mut lng_hi) = (-180.0_f64, 180.0_f64);
    let mut even = true;

    for c in hash.chars() {
        let idx = BASE32
            .iter()
            .position(|&b| b as char == c)
            .ok_or_else(|| {
                EngineError::InvalidArgument(format!("geohash含有非法字符: {}", c))
            })?;

        for shift in (0..5).rev() {
            let bit = (idx >> shift) & 1;
            if even {
                let mid = (lng_lo + lng_hi) / 2.0;
                if bit == 1 {
                    lng_lo = mid;
                } else {
                    lng_hi = mid;
                }
            } else {
                let mid = (lat_lo + lat_hi) / 2.0;
                if bit == 1 {
                    lat_lo = mid;
                } else {
                    lat_hi = mid;
                }
            }
            even = !even;
        }
    }

    let lat = (lat_lo + lat_hi) / 2.0;
    let lng = (lng_lo + lng_hi) / 2.0;
    Ok((lat, lng, (lat_hi - lat_lo) / 2.0, (lng_hi - lng_lo) / 2.0))
}

/// Haversine 球面距离（米）
pub fn calculate_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);

    // 浮点误差可能让 a 略微越过1
    2.0 * EARTH_RADIUS_M * a.min(1.0).sqrt().asin()
}

/// 索引精度：在9格覆盖保证成立的前提下尽量细分，
/// 即较小的格子边长仍不小于最大查询半径的最细精度
pub fn indexing_precision(max_radius_m: f64) -> usize {
    let mut precision = 1;
    for (i, (w, h)) in CELL_DIMENSIONS_M.iter().enumerate() {
        if w.min(*h) >= max_radius_m {
            precision = i + 1;
        } else {
            break;
        }
    }
    precision
}

/// 查询覆盖：中心格与8个相邻格的前缀集合
///
/// 目标点可能落在相邻格里，只查中心格会漏掉贴边的用户，
/// 所以必须取中心格加8邻域，再由精确距离过滤兜底。
pub fn covering_prefixes(
    latitude: f64,
    longitude: f64,
    precision: usize,
) -> Result<Vec<String>, EngineError> {
    let center = encode(latitude, longitude, precision)?;
    let (lat, lng, lat_err, lng_err) = decode(&center)?;

    let mut prefixes = Vec::with_capacity(9);
    for dy in [-1.0_f64, 0.0, 1.0] {
        let n_lat = lat + dy * 2.0 * lat_err;
        // 越过极点的格子不存在，靠剩余格子覆盖
        if !(-90.0..=90.0).contains(&n_lat) {
            continue;
        }
        for dx in [-1.0_f64, 0.0, 1.0] {
            let mut n_lng = lng + dx * 2.0 * lng_err;
            // 经度跨越±180时回卷
            if n_lng > 180.0 {
                n_lng -= 360.0;
            } else if n_lng < -180.0 {
                n_lng += 360.0;
            }
            prefixes.push(encode(n_lat, n_lng, precision)?);
        }
    }

    prefixes.sort();
    prefixes.dedup();
    Ok(prefixes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_known_vector() {
        // 维基百科经典样例
        let hash = encode(57.64911, 10.40744, 11).unwrap();
        assert_eq!(hash, "u4pruydqqvj");
    }

    #[test]
    fn decode_known_vector() {
        let (lat, lng, lat_err, lng_err) = decode("ezs42").unwrap();
        assert!((lat - 42.605).abs() < 0.025);
        assert!((lng - (-5.603)).abs() < 0.025);
        assert!(lat_err > 0.0 && lng_err > 0.0);
    }

    #[test]
    fn roundtrip_stays_within_cell_error() {
        let cases = [
            (31.6801, 34.5866),
            (0.0, 0.0),
            (-33.8688, 151.2093),
            (89.9, -179.9),
        ];
        for precision in [6usize, 7, 8, 9] {
            for (lat, lng) in cases {
                let hash = encode(lat, lng, precision).unwrap();
                assert_eq!(hash.len(), precision);
                let (d_lat, d_lng, lat_err, lng_err) = decode(&hash).unwrap();
                assert!((d_lat - lat).abs() <= lat_err);
                assert!((d_lng - lng).abs() <= lng_err);
            }
        }
    }

    #[test]
    fn nearby_points_share_prefix() {
        // 相距约45米的两点在粗精度下同格
        let a = encode(31.6801, 34.5866, 5).unwrap();
        let b = encode(31.680505, 34.5866, 5).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn shared_prefix_bounds_distance_by_cell_diagonal() {
        // 前缀包含性质：同格两点的间距不超过该精度格子的对角线
        let a = (31.6801, 34.5866);
        let b = (31.680505, 34.5866);
        for precision in [5usize, 6] {
            assert_eq!(
                encode(a.0, a.1, precision).unwrap(),
                encode(b.0, b.1, precision).unwrap()
            );
            let (w, h) = cell_dimensions(precision);
            let bound = (w * w + h * h).sqrt();
            assert!(calculate_distance(a.0, a.1, b.0, b.1) <= bound);
        }
    }

    #[test]
    fn encode_rejects_bad_input() {
        assert!(encode(91.0, 0.0, 8).is_err());
        assert!(encode(0.0, 180.5, 8).is_err());
        assert!(encode(f64::NAN, 0.0, 8).is_err());
        assert!(encode(0.0, 0.0, 0).is_err());
        assert!(encode(0.0, 0.0, 13).is_err());
    }

    #[test]
    fn decode_rejects_bad_input() {
        assert!(decode("").is_err());
        // 'a' 不在 geohash 字母表里
        assert!(decode("ezsa2").is_err());
    }

    #[test]
    fn haversine_fixture_45m() {
        // 中心点北移 0.000405 度约等于 45 米
        let d = calculate_distance(31.6801, 34.5866, 31.680505, 34.5866);
        assert!((d - 45.0).abs() < 0.5, "distance was {}", d);
    }

    #[test]
    fn haversine_zero_for_same_point() {
        assert_eq!(calculate_distance(31.6801, 34.5866, 31.6801, 34.5866), 0.0);
    }

    #[test]
    fn indexing_precision_covers_radius() {
        assert_eq!(indexing_precision(5000.0), 4);
        assert_eq!(indexing_precision(4890.0), 5);
        assert_eq!(indexing_precision(100.0), 7);
        assert_eq!(indexing_precision(10.0), 8);
        // 任何离谱的半径都退化到最粗精度而不是越界
        assert_eq!(indexing_precision(1.0e9), 1);
    }

    #[test]
    fn covering_prefixes_include_center_cell() {
        let precision = indexing_precision(5000.0);
        let prefixes = covering_prefixes(31.6801, 34.5866, precision).unwrap();
        let center = encode(31.6801, 34.5866, precision).unwrap();
        assert!(prefixes.contains(&center));
        assert!(prefixes.len() <= 9 && prefixes.len() >= 4);
        assert!(prefixes.iter().all(|p| p.len() == precision));
    }

    #[test]
    fn covering_prefixes_wrap_at_antimeridian() {
        let prefixes = covering_prefixes(0.0, 179.999, 4).unwrap();
        assert!(!prefixes.is_empty());
        assert!(prefixes.iter().all(|p| p.len() == 4));
    }
}
