use approx::assert_relative_eq;
use niftyreg_bridge::transform::{decode, encode, read_matrix_file, write_matrix_file};
use niftyreg_bridge::{AffineMatrix, ErrorKind};
use tempfile::TempDir;

fn sample_matrix() -> AffineMatrix {
    AffineMatrix::from_rows([
        [0.98480775, -0.17364818, 0.0, 12.5],
        [0.17364818, 0.98480775, 0.0, -3.25],
        [0.0, 0.0, 1.0, 0.125],
        [0.0, 0.0, 0.0, 1.0],
    ])
}

#[test]
fn test_round_trip_within_eight_decimals() {
    let matrix = sample_matrix();
    let decoded = decode(&encode(&matrix)).unwrap();
    for row in 0..4 {
        for col in 0..4 {
            assert_relative_eq!(decoded.get(row, col), matrix.get(row, col), epsilon = 1e-8);
        }
    }
}

#[test]
fn test_file_layout() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.txt");
    write_matrix_file(&sample_matrix(), &path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.split('\n').collect();
    assert_eq!(lines.len(), 4);
    assert!(lines.iter().all(|line| line.len() == 4 * 13));
    assert_eq!(&lines[0][..13], "   0.98480775");
    assert_eq!(&lines[1][39..], "  -3.25000000");

    let back = read_matrix_file(&path).unwrap();
    assert!(back.approx_eq(&sample_matrix(), 1e-8));
}

#[test]
fn test_decode_accepts_any_whitespace() {
    let m = decode("  1\t0 0 10\r\n0 1 0 20\n\n0 0 1 30\n0 0 0 1  \n").unwrap();
    assert_eq!(m.get(0, 3), 10.0);
    assert_eq!(m.get(2, 3), 30.0);
}

#[test]
fn test_decode_rejects_non_square() {
    let err = decode("1 0 0 0\n0 1 0 0\n0 0 1 0").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_decode_rejects_unsupported_square() {
    // 5x5 is square but not a 2D or 3D homogeneous matrix
    let values = vec!["0"; 25].join(" ");
    assert_eq!(decode(&values).unwrap_err().kind(), ErrorKind::Format);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = read_matrix_file(&dir.path().join("absent.txt")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_inverse() {
    let inverse = sample_matrix().inverse().unwrap();
    let product = sample_matrix().as_matrix() * inverse.as_matrix();
    for row in 0..4 {
        for col in 0..4 {
            let expected = if row == col { 1.0 } else { 0.0 };
            assert_relative_eq!(product[(row, col)], expected, epsilon = 1e-9);
        }
    }
}
