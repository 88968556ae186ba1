//! Streaming decode integration tests.
//!
//! Tests: chunked equivalence at every split point, language model state
//! across chunks, finalization, multi-stream calls and handle lifecycle.

mod common;

use common::*;
use eyre::{OptionExt, Result};
use melops_ctc::batch::BatchDecoder;
use melops_ctc::error::{Error, StateError};
use melops_ctc::registry::Registry;
use melops_ctc::state::Phase;
use ndarray::{Axis, s};

#[test]
fn word_model_survives_split_at_frame_two() -> Result<()> {
    init_tracing();
    let decoder = BatchDecoder::from_config(config(), &lm_config(0.5, 1.0), VOCABULARY.clone())?;
    let frames = frames(&P2);

    let whole = decoder.new_state()?.advance(frames.view(), true)?;

    let mut state = decoder.new_state()?;
    let partial = state.advance(frames.slice(s![..2, ..]), false)?;
    assert_eq!(state.phase(), Phase::Active);
    assert!(!partial.is_empty());

    let split = state.advance(frames.slice(s![2.., ..]), true)?;

    assert_eq!(best_text(&split), "a a");
    assert_eq!(split[0], whole[0]);
    Ok(())
}

#[test]
fn every_split_point_matches_whole_decode() -> Result<()> {
    let decoder = BatchDecoder::new(config(), VOCABULARY.clone(), None)?;

    for probs in [&P1, &P2] {
        let frames = frames(probs);
        let whole = decoder.new_state()?.advance(frames.view(), true)?;

        for k in 0..=frames.nrows() {
            let mut state = decoder.new_state()?;
            state.advance(frames.slice(s![..k, ..]), false)?;
            let split = state.advance(frames.slice(s![k.., ..]), true)?;

            assert_eq!(split, whole, "split at {k}");
        }
    }
    Ok(())
}

#[test]
fn frame_by_frame_matches_whole_decode() -> Result<()> {
    let decoder = BatchDecoder::from_config(config(), &lm_config(1.0, 2.0), VOCABULARY.clone())?;
    let frames = frames(&P2);
    let whole = decoder.new_state()?.advance(frames.view(), true)?;

    let mut state = decoder.new_state()?;
    let last = frames.nrows() - 1;
    let mut result = Vec::new();
    for (t, frame) in frames.axis_iter(Axis(0)).enumerate() {
        result = state.advance(frame.insert_axis(Axis(0)), t == last)?;
    }

    assert_eq!(result, whole);
    assert_eq!(state.frames_consumed(), 6);
    Ok(())
}

#[test]
fn snapshot_does_not_advance_state() -> Result<()> {
    let decoder = BatchDecoder::from_config(config(), &lm_config(0.5, 1.0), VOCABULARY.clone())?;
    let frames = frames(&P2);
    let mut state = decoder.new_state()?;

    let returned = state.advance(frames.slice(s![..3, ..]), false)?;
    let first = state.snapshot();
    let second = state.snapshot();

    assert_eq!(returned, first);
    assert_eq!(first, second);
    assert_eq!(state.frames_consumed(), 3);
    Ok(())
}

#[test]
fn finalized_state_is_frozen() -> Result<()> {
    let decoder = BatchDecoder::new(config(), VOCABULARY.clone(), None)?;
    let frames = frames(&P1);
    let mut state = decoder.new_state()?;

    let done = state.advance(frames.view(), true)?;
    let err = state.advance(frames.view(), true).unwrap_err();

    assert!(matches!(err, Error::State(StateError::Finalized)));
    assert!(state.is_finalized());
    assert_eq!(state.snapshot(), done);
    assert_eq!(state.frames_consumed(), 6);
    Ok(())
}

#[test]
fn multi_stream_call_advances_each_stream() -> Result<()> {
    let decoder = BatchDecoder::new(config().with_num_processes(24), VOCABULARY.clone(), None)?;
    let probs = batch(&[&P1, &P2]);
    let mut a = decoder.new_state()?;
    let mut b = decoder.new_state()?;

    decoder.decode_online(
        &mut [&mut a, &mut b],
        probs.slice(s![.., ..3, ..]),
        None,
        &[false, false],
    )?;
    let results = decoder.decode_online(
        &mut [&mut a, &mut b],
        probs.slice(s![.., 3.., ..]),
        None,
        &[true, true],
    )?;

    let texts: Vec<String> = results
        .into_iter()
        .map(|r| r.map(|h| best_text(&h)))
        .collect::<Result<_, _>>()?;
    assert_eq!(texts, ["acdc", "b'a"]);
    assert!(a.is_finalized() && b.is_finalized());
    Ok(())
}

#[test]
fn streams_may_finish_at_different_times() -> Result<()> {
    let decoder = BatchDecoder::new(config(), VOCABULARY.clone(), None)?;
    let probs = batch(&[&P1, &P2]);
    let mut a = decoder.new_state()?;
    let mut b = decoder.new_state()?;

    // stream a ends after four frames, stream b keeps going
    decoder.decode_online(
        &mut [&mut a, &mut b],
        probs.slice(s![.., ..4, ..]),
        None,
        &[true, false],
    )?;
    let rest = b.advance(probs.slice(s![1, 4.., ..]), true)?;

    let expected = decoder.decode(probs.view(), Some(&[4, 6]))?;
    assert_eq!(Some(&a.snapshot()), expected[0].as_ref().ok());
    assert_eq!(Some(&rest), expected[1].as_ref().ok());
    Ok(())
}

#[test]
fn finalized_stream_rejects_whole_multi_stream_call() -> Result<()> {
    let decoder = BatchDecoder::new(config(), VOCABULARY.clone(), None)?;
    let probs = batch(&[&P1, &P2]);
    let mut open = decoder.new_state()?;
    let mut closed = decoder.new_state()?;
    closed.advance(frames(&P2).view(), true)?;

    let err = decoder
        .decode_online(
            &mut [&mut open, &mut closed],
            probs.view(),
            None,
            &[false, true],
        )
        .unwrap_err();

    assert!(matches!(err, Error::State(StateError::Finalized)));
    assert_eq!(open.phase(), Phase::Uninitialized);
    assert_eq!(open.frames_consumed(), 0);
    Ok(())
}

#[test]
fn invalid_stream_fails_alone() -> Result<()> {
    let decoder = BatchDecoder::new(config(), VOCABULARY.clone(), None)?;
    let mut probs = batch(&[&P1, &P2]);
    probs[[1, 2, 3]] = f32::NAN;
    let mut a = decoder.new_state()?;
    let mut b = decoder.new_state()?;

    let results = decoder.decode_online(&mut [&mut a, &mut b], probs.view(), None, &[true, true])?;

    assert_eq!(best_text(results[0].as_ref().map_err(Clone::clone)?), "acdc");
    assert!(results[1].is_err());
    assert_eq!(b.phase(), Phase::Uninitialized);
    Ok(())
}

#[test]
fn registry_drives_streams_through_handles() -> Result<()> {
    let mut registry = Registry::new();
    let scorer = registry.create_scorer(&lm_config(0.5, 1.0), &VOCABULARY)?;
    let lm_stream = registry.create_state(config(), &VOCABULARY, Some(scorer))?;
    let plain_stream = registry.create_state(config(), &VOCABULARY, None)?;

    let probs = batch(&[&P2, &P2]);
    let head = probs.slice(s![.., ..2, ..]);
    let tail = probs.slice(s![.., 2.., ..]);

    let handles = [lm_stream, plain_stream];
    registry.decode_online(&handles, head, None, &[false, false], 2)?;
    let results = registry.decode_online(&handles, tail, None, &[true, true], 2)?;

    let with_lm = results[0].as_ref().map_err(Clone::clone)?;
    let without_lm = results[1].as_ref().map_err(Clone::clone)?;
    assert_eq!(best_text(with_lm), "a a");
    assert_eq!(best_text(without_lm), "b'a");

    assert!(matches!(
        registry.reset_weights(scorer, 1.0, 1.0),
        Err(Error::State(StateError::ScorerInUse { holders: 1 }))
    ));

    registry.release_state(lm_stream)?;
    registry.release_state(plain_stream)?;
    registry.reset_weights(scorer, 1.0, 1.0)?;
    registry.release_scorer(scorer)?;

    assert!(matches!(
        registry.release_scorer(scorer),
        Err(Error::State(StateError::UnknownHandle { kind: "scorer" }))
    ));
    assert_eq!(registry.state_count(), 0);
    assert_eq!(registry.scorer_count(), 0);

    let stale = registry.snapshot(lm_stream).err().ok_or_eyre("stale handle accepted")?;
    assert!(matches!(stale, Error::State(StateError::UnknownHandle { .. })));
    Ok(())
}
