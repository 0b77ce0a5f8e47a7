mod common;

use tilewall_client::{ClientError, ClientOptions, WallClient};
use tilewall_net::{CodecKind, NetError};
use tilewall_types::{Eye, Vec2i};

#[test]
fn frames_reach_a_peer_direct_wall_in_order() {
    let info_port = common::free_port();
    let ranks = common::spawn_wall(common::wall_config(false, info_port, CodecKind::Raw), 3);
    let client = common::connect(info_port, CodecKind::Raw);
    assert_eq!(client.info().nodes.len(), 2);
    assert_eq!(client.info().total_pixels_in_wall, Vec2i::new(8, 4));

    for frame in 0..3u32 {
        client.begin_frame().unwrap();
        assert_eq!(client.frame_id(), frame as i32);
        let image = common::gradient(8, 4, frame * 100);
        // each half on its own, sharing the full-width pitch
        client.send_rgba(0, 0, 4, 4, 8, &image).unwrap();
        client.send_rgba(4, 0, 4, 4, 8, &image[4..]).unwrap();
        client.end_frame();
    }

    let walls = common::join_wall(ranks);
    for (rank, frames) in walls.iter().enumerate() {
        assert_eq!(frames.len(), 3);
        for (n, frame) in frames.iter().enumerate() {
            assert_eq!(frame.frame_id, n as i32);
            assert_eq!(frame.size, Vec2i::new(4, 4));
            let base = n as u32 * 100 + rank as u32 * 4;
            for y in 0..4 {
                for x in 0..4 {
                    assert_eq!(frame.left[y * 4 + x], base + (y * 8 + x) as u32);
                }
            }
        }
    }
    client.disconnect();
}

#[test]
fn deflate_tiles_through_a_head_node() {
    let info_port = common::free_port();
    let ranks = common::spawn_wall(common::wall_config(true, info_port, CodecKind::Deflate), 2);
    let client = common::connect(info_port, CodecKind::Deflate);
    assert_eq!(client.info().nodes.len(), 1);

    for frame in 0..2u32 {
        client.begin_frame().unwrap();
        let image = common::gradient(8, 4, frame * 1000);
        // tiles straddling the display boundary
        client.send_rgba(0, 0, 6, 4, 8, &image).unwrap();
        client.send_rgba(6, 0, 2, 4, 8, &image[6..]).unwrap();
        client.end_frame();
    }

    let walls = common::join_wall(ranks);
    assert!(walls[0].is_empty());
    for (display, frames) in walls[1..].iter().enumerate() {
        assert_eq!(frames.len(), 2);
        let last = &frames[1];
        assert_eq!(last.frame_id, 1);
        assert_eq!(last.left[0], 1000 + display as u32 * 4);
        assert_eq!(last.left[15], 1000 + 3 * 8 + 3 + display as u32 * 4);
    }
}

#[test]
fn jpeg_tiles_arrive_close_to_the_source() {
    let info_port = common::free_port();
    let ranks = common::spawn_wall(common::wall_config(false, info_port, CodecKind::Jpeg), 1);
    let client = common::connect(info_port, CodecKind::Jpeg);

    let color = u32::from_le_bytes([200, 40, 90, 0xff]);
    client.begin_frame().unwrap();
    client.send_rgba(0, 0, 8, 4, 8, &[color; 32]).unwrap();
    client.end_frame();

    let walls = common::join_wall(ranks);
    for frames in &walls {
        assert_eq!(frames.len(), 1);
        for &p in &frames[0].left {
            let got = p.to_le_bytes();
            assert_eq!(got[3], 0xff);
            for (g, want) in got[..3].iter().zip([200u8, 40, 90]) {
                assert!(g.abs_diff(want) <= 4, "channel {} vs {}", g, want);
            }
        }
    }
    client.disconnect();
}

#[test]
fn stereo_eyes_are_sent_separately() {
    let info_port = common::free_port();
    let text = format!(
        "[wall]\nnum_displays = [1, 1]\nwindow_size = [2, 2]\nstereo = true\n\n\
         [service]\ninfo_port = {}\nadvertise_host = \"127.0.0.1\"\n",
        info_port
    );
    let config = std::sync::Arc::new(tilewall_service::ServiceConfig::from_toml(&text).unwrap());
    let ranks = common::spawn_wall(config, 1);
    let client = common::connect(info_port, CodecKind::Raw);
    assert!(client.info().stereo);

    client.begin_frame().unwrap();
    client.send_rgba_eye(Eye::Left, 0, 0, 2, 2, 2, &[1; 4]).unwrap();
    client.send_rgba_eye(Eye::Right, 0, 0, 2, 2, 2, &[2; 4]).unwrap();
    client.end_frame();

    let walls = common::join_wall(ranks);
    let frame = &walls[0][0];
    assert_eq!(frame.eye(Eye::Left), &[1u32; 4]);
    assert_eq!(frame.eye(Eye::Right), &[2u32; 4]);
}

#[test]
fn unreachable_info_port_fails_before_streaming() {
    let port = common::free_port();
    match WallClient::connect("127.0.0.1", port, 1, ClientOptions::default()) {
        Err(ClientError::InfoUnavailable { addr, source }) => {
            assert_eq!(addr, format!("127.0.0.1:{}", port));
            assert!(matches!(source, NetError::Connection { .. }));
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("connected to nothing"),
    }
}

#[test]
fn malformed_tiles_are_refused() {
    let info_port = common::free_port();
    let ranks = common::spawn_wall(common::wall_config(false, info_port, CodecKind::Raw), 1);
    let client = common::connect(info_port, CodecKind::Raw);
    client.begin_frame().unwrap();

    assert!(matches!(
        client.send_rgba(0, 0, 0, 4, 8, &[0; 32]),
        Err(ClientError::InvalidTile(_))
    ));
    assert!(matches!(
        client.send_rgba(0, 0, 8, 4, 8, &[0; 31]),
        Err(ClientError::InvalidTile(_))
    ));
    assert!(matches!(
        client.send_rgba(0, 0, 8, 4, 4, &[0; 32]),
        Err(ClientError::InvalidTile(_))
    ));
    assert!(matches!(
        client.send_rgba(i32::MAX - 1, 0, 4, 4, 4, &[0; 16]),
        Err(ClientError::InvalidTile(_))
    ));
    assert!(matches!(
        client.send_rgba(0, i32::MAX, 4, 1, 4, &[0; 4]),
        Err(ClientError::InvalidTile(_))
    ));

    client.send_rgba(0, 0, 8, 4, 8, &[5; 32]).unwrap();
    client.end_frame();
    let walls = common::join_wall(ranks);
    assert!(walls.iter().all(|frames| frames[0].left.iter().all(|&p| p == 5)));
}
