//! Timeline derivation.
//!
//! Timelines are rebuilt from the persisted states and events on every read:
//!
//! 1. closed states plus open slots (closed at "now", flagged in progress)
//! 2. sorted by start, ties by open sequence
//! 3. band view: linked continuations fold into the preceding same-type band
//!    of their scope
//! 4. tree view: nested bands hang off the band that contains their start
//!
//! Every state lands in exactly one band; folding keeps each constituent as
//! a segment and keeps all comments.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::config::TimelineConfig;
use crate::error::{Error, Result};
use crate::event::{sort_events, Event, EventType};
use crate::persistence::IdeaFlowPersistence;
use crate::state::{IdeaFlowState, PartialState, Scope, StateType};
use crate::task::{Task, TaskId};

/// Knobs for timeline assembly.
#[derive(Debug, Clone, Copy)]
pub struct TimelineOptions {
    pub merge_linked: bool,
    pub include_events: bool,
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self {
            merge_linked: true,
            include_events: true,
        }
    }
}

impl From<&TimelineConfig> for TimelineOptions {
    fn from(config: &TimelineConfig) -> Self {
        Self {
            merge_linked: config.merge_linked,
            include_events: config.include_events,
        }
    }
}

/// One constituent interval of a band.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub start_offset: i64,
    pub end_offset: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Band {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub start_offset: i64,
    pub end_offset: i64,
    #[serde(rename = "type")]
    pub state_type: StateType,
    pub scope: Scope,
    pub depth: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
    pub is_nested: bool,
    pub is_linked_to_previous: bool,
    pub in_progress: bool,
    pub segments: Vec<Segment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_scope: Option<Scope>,
    #[serde(skip)]
    pub sequence: u64,
}

impl Band {
    fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub offset: i64,
    #[serde(flatten)]
    pub event: Event,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimelineNode {
    #[serde(flatten)]
    pub band: Band,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TimelineNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<TimelineEvent>,
}

impl TimelineNode {
    /// Number of nodes in this subtree, self included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TimelineNode::size).sum::<usize>()
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimelineSummary {
    pub total_seconds: i64,
    /// Seconds per state type on the primary track.
    pub by_type: BTreeMap<StateType, i64>,
    pub idle_seconds: i64,
    pub event_counts: BTreeMap<EventType, usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandTimeline {
    pub task: Task,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub bands: Vec<Band>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<TimelineEvent>,
    pub summary: TimelineSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeTimeline {
    pub task: Task,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub nodes: Vec<TimelineNode>,
    /// Events outside every band.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<TimelineEvent>,
    pub summary: TimelineSummary,
}

/// A state prepared for band assembly.
#[derive(Debug, Clone)]
pub struct Span {
    pub state: IdeaFlowState,
    pub in_progress: bool,
}

/// Combine archived and open states into one chronological list.
///
/// Open states are closed at `now` for display. A state seen both open and
/// archived (a close landing between the two reads) is kept once, archived.
pub fn collect_spans(
    closed: Vec<IdeaFlowState>,
    open: Vec<PartialState>,
    now: DateTime<Utc>,
) -> Vec<Span> {
    let archived: HashSet<(Scope, u64)> = closed
        .iter()
        .map(|state| (state.scope, state.sequence))
        .collect();

    let mut spans: Vec<Span> = closed
        .into_iter()
        .map(|state| Span {
            state,
            in_progress: false,
        })
        .collect();
    spans.extend(
        open.into_iter()
            .filter(|state| !archived.contains(&(state.scope, state.sequence)))
            .map(|state| Span {
                state: state.close(now, None),
                in_progress: true,
            }),
    );
    spans.sort_by(|a, b| {
        a.state
            .start
            .cmp(&b.state.start)
            .then_with(|| a.state.sequence.cmp(&b.state.sequence))
    });
    spans
}

fn offset(origin: DateTime<Utc>, instant: DateTime<Utc>) -> i64 {
    (instant - origin).num_seconds()
}

fn span_comments(state: &IdeaFlowState) -> impl Iterator<Item = String> + '_ {
    state
        .starting_comment
        .iter()
        .chain(state.ending_comment.iter())
        .cloned()
}

/// Flatten spans into bands, folding linked continuations when asked to.
pub fn assemble_bands(spans: &[Span], origin: DateTime<Utc>, merge_linked: bool) -> Vec<Band> {
    let mut bands: Vec<Band> = Vec::with_capacity(spans.len());
    let mut last_in_scope: HashMap<Scope, usize> = HashMap::new();

    for span in spans {
        let state = &span.state;
        let segment = Segment {
            start_offset: offset(origin, state.start),
            end_offset: offset(origin, state.end),
        };

        let fold_into = last_in_scope
            .get(&state.scope)
            .copied()
            .filter(|_| merge_linked && state.is_linked_to_previous)
            .filter(|index| bands[*index].state_type == state.state_type);

        if let Some(index) = fold_into {
            let band = &mut bands[index];
            if state.end > band.end {
                band.end = state.end;
                band.end_offset = segment.end_offset;
            }
            band.comments.extend(span_comments(state));
            band.in_progress |= span.in_progress;
            band.segments.push(segment);
            continue;
        }

        let comments: Vec<String> = span_comments(state).collect();
        bands.push(Band {
            start: state.start,
            end: state.end,
            start_offset: segment.start_offset,
            end_offset: segment.end_offset,
            state_type: state.state_type,
            scope: state.scope,
            depth: state.scope.depth(),
            comment: state.starting_comment.clone(),
            comments,
            is_nested: state.is_nested,
            is_linked_to_previous: state.is_linked_to_previous,
            in_progress: span.in_progress,
            segments: vec![segment],
            parent_scope: state.parent_scope,
            sequence: state.sequence,
        });
        last_in_scope.insert(state.scope, bands.len() - 1);
    }

    bands
}

/// Index of the band a nested band belongs under.
///
/// Candidates are shallower bands whose closed interval holds the child's
/// start. Preference: the recorded parent scope, then depth, then the latest
/// start.
fn find_parent(bands: &[Band], child: usize) -> Option<usize> {
    let target = &bands[child];
    bands
        .iter()
        .enumerate()
        .filter(|(index, band)| {
            *index != child && band.depth < target.depth && band.contains(target.start)
        })
        .max_by_key(|(_, band)| {
            (
                Some(band.scope) == target.parent_scope,
                band.depth,
                band.start,
                band.sequence,
            )
        })
        .map(|(index, _)| index)
}

/// Deepest, latest band containing `instant`.
fn find_container(bands: &[Band], instant: DateTime<Utc>) -> Option<usize> {
    bands
        .iter()
        .enumerate()
        .filter(|(_, band)| band.contains(instant))
        .max_by_key(|(_, band)| (band.depth, band.start, band.sequence))
        .map(|(index, _)| index)
}

fn assemble_node(
    index: usize,
    bands: &[Band],
    children: &[Vec<usize>],
    events: &mut [Vec<TimelineEvent>],
) -> TimelineNode {
    TimelineNode {
        band: bands[index].clone(),
        children: children[index]
            .iter()
            .map(|child| assemble_node(*child, bands, children, events))
            .collect(),
        events: std::mem::take(&mut events[index]),
    }
}

/// Arrange bands into a forest and distribute events over it.
///
/// Returns the forest and the events no band contains.
pub fn assemble_tree(
    bands: &[Band],
    events: Vec<TimelineEvent>,
) -> (Vec<TimelineNode>, Vec<TimelineEvent>) {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); bands.len()];
    let mut roots = Vec::new();
    for index in 0..bands.len() {
        let parent = if bands[index].depth == 0 {
            None
        } else {
            find_parent(bands, index)
        };
        match parent {
            Some(parent) => children[parent].push(index),
            None => roots.push(index),
        }
    }

    let mut by_band: Vec<Vec<TimelineEvent>> = vec![Vec::new(); bands.len()];
    let mut loose = Vec::new();
    for event in events {
        match find_container(bands, event.event.position) {
            Some(index) => by_band[index].push(event),
            None => loose.push(event),
        }
    }

    let nodes = roots
        .into_iter()
        .map(|root| assemble_node(root, bands, &children, &mut by_band))
        .collect();
    (nodes, loose)
}

/// Aggregate durations and event counts.
pub fn summarize(
    bands: &[Band],
    events: &[Event],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> TimelineSummary {
    let mut summary = TimelineSummary {
        total_seconds: (end - start).num_seconds(),
        ..TimelineSummary::default()
    };
    for band in bands.iter().filter(|band| band.scope == Scope::Primary) {
        *summary.by_type.entry(band.state_type).or_insert(0) += band.duration_seconds();
    }
    for event in events {
        *summary.event_counts.entry(event.event_type).or_insert(0) += 1;
        if event.event_type == EventType::IdleActivity {
            summary.idle_seconds += event.duration_seconds.unwrap_or(0).max(0);
        }
    }
    summary
}

struct TimelineInput {
    task: Task,
    bands: Vec<Band>,
    events: Vec<Event>,
    end: DateTime<Utc>,
}

/// Read-side builder; takes no task lock.
pub struct TimelineBuilder<'a> {
    persistence: &'a dyn IdeaFlowPersistence,
    clock: &'a dyn Clock,
    options: TimelineOptions,
}

impl<'a> TimelineBuilder<'a> {
    pub fn new(
        persistence: &'a dyn IdeaFlowPersistence,
        clock: &'a dyn Clock,
        options: TimelineOptions,
    ) -> Self {
        Self {
            persistence,
            clock,
            options,
        }
    }

    fn load(&self, task_id: TaskId) -> Result<TimelineInput> {
        let task = self
            .persistence
            .find_task(task_id)?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
        let now = self.clock.now();

        // Open before closed: a concurrent close then shows up twice, never
        // zero times, and collect_spans drops the duplicate.
        let open = self.persistence.find_open_partial_states(task_id)?;
        let closed = self.persistence.find_closed_states(task_id)?;
        let spans = collect_spans(closed, open, now);
        let bands = assemble_bands(&spans, task.created_at, self.options.merge_linked);

        let mut events = self.persistence.find_events(task_id)?;
        sort_events(&mut events);

        let end = bands
            .iter()
            .map(|band| band.end)
            .chain(events.iter().map(|event| event.position))
            .max()
            .unwrap_or(task.created_at)
            .max(task.created_at);

        Ok(TimelineInput {
            task,
            bands,
            events,
            end,
        })
    }

    fn timeline_events(&self, origin: DateTime<Utc>, events: &[Event]) -> Vec<TimelineEvent> {
        if !self.options.include_events {
            return Vec::new();
        }
        events
            .iter()
            .map(|event| TimelineEvent {
                offset: offset(origin, event.position),
                event: event.clone(),
            })
            .collect()
    }

    pub fn build_band_timeline(&self, task_id: TaskId) -> Result<BandTimeline> {
        let input = self.load(task_id)?;
        let origin = input.task.created_at;
        let summary = summarize(&input.bands, &input.events, origin, input.end);
        let events = self.timeline_events(origin, &input.events);
        Ok(BandTimeline {
            start: origin,
            end: input.end,
            bands: input.bands,
            events,
            summary,
            task: input.task,
        })
    }

    pub fn build_tree_timeline(&self, task_id: TaskId) -> Result<TreeTimeline> {
        let input = self.load(task_id)?;
        let origin = input.task.created_at;
        let summary = summarize(&input.bands, &input.events, origin, input.end);
        let events = self.timeline_events(origin, &input.events);
        let (nodes, loose) = assemble_tree(&input.bands, events);
        Ok(TreeTimeline {
            start: origin,
            end: input.end,
            nodes,
            events: loose,
            summary,
            task: input.task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn closed(
        scope: Scope,
        state_type: StateType,
        start: i64,
        end: i64,
        sequence: u64,
    ) -> IdeaFlowState {
        IdeaFlowState {
            task_id: 1,
            scope,
            state_type,
            start: at(start),
            end: at(end),
            starting_comment: None,
            ending_comment: None,
            is_linked_to_previous: false,
            is_nested: scope.is_nested(),
            parent_scope: scope.is_nested().then_some(Scope::Primary),
            sequence,
        }
    }

    fn spans(states: Vec<IdeaFlowState>) -> Vec<Span> {
        collect_spans(states, Vec::new(), at(1_000))
    }

    #[test]
    fn linked_same_type_folds_into_one_band() {
        let first = IdeaFlowState {
            starting_comment: Some("stuck".into()),
            ..closed(Scope::Primary, StateType::Conflict, 100, 130, 1)
        };
        let second = IdeaFlowState {
            starting_comment: Some("still stuck".into()),
            is_linked_to_previous: true,
            ..closed(Scope::Primary, StateType::Conflict, 140, 200, 2)
        };

        let bands = assemble_bands(&spans(vec![first, second]), at(0), true);
        assert_eq!(bands.len(), 1);
        assert_eq!((bands[0].start_offset, bands[0].end_offset), (100, 200));
        assert_eq!(bands[0].comments, vec!["stuck", "still stuck"]);
        assert_eq!(bands[0].segments.len(), 2);
    }

    #[test]
    fn folding_can_be_disabled() {
        let first = closed(Scope::Primary, StateType::Conflict, 100, 130, 1);
        let second = IdeaFlowState {
            is_linked_to_previous: true,
            ..closed(Scope::Primary, StateType::Conflict, 140, 200, 2)
        };
        let bands = assemble_bands(&spans(vec![first, second]), at(0), false);
        assert_eq!(bands.len(), 2);
    }

    #[test]
    fn linked_flag_across_types_does_not_fold() {
        let first = closed(Scope::Primary, StateType::Learning, 0, 50, 0);
        let second = IdeaFlowState {
            is_linked_to_previous: true,
            ..closed(Scope::Primary, StateType::Conflict, 50, 80, 1)
        };
        let bands = assemble_bands(&spans(vec![first, second]), at(0), true);
        assert_eq!(bands.len(), 2);
    }

    #[test]
    fn open_states_close_at_now_and_duplicates_drop() {
        let archived = closed(Scope::Primary, StateType::Progress, 0, 10, 0);
        let stale_open = PartialState {
            task_id: 1,
            scope: Scope::Primary,
            state_type: StateType::Progress,
            start: at(0),
            starting_comment: None,
            is_linked_to_previous: false,
            is_nested: false,
            parent_scope: None,
            sequence: 0,
        };
        let live_open = PartialState {
            scope: Scope::Subtask,
            sequence: 1,
            start: at(5),
            ..stale_open.clone()
        };

        let spans = collect_spans(vec![archived], vec![stale_open, live_open], at(42));
        assert_eq!(spans.len(), 2);
        assert!(!spans[0].in_progress);
        assert!(spans[1].in_progress);
        assert_eq!(spans[1].state.end, at(42));
    }

    #[test]
    fn ties_keep_open_order() {
        let a = closed(Scope::Primary, StateType::Progress, 10, 10, 3);
        let b = closed(Scope::Subtask, StateType::Progress, 10, 20, 1);
        let ordered = spans(vec![a, b]);
        assert_eq!(ordered[0].state.sequence, 1);
        assert_eq!(ordered[1].state.sequence, 3);
    }

    #[test]
    fn nested_band_attaches_to_container_of_its_start() {
        let bands = assemble_bands(
            &spans(vec![
                closed(Scope::Primary, StateType::Progress, 0, 100, 0),
                closed(Scope::Primary, StateType::Conflict, 100, 150, 1),
                closed(Scope::Nested(1), StateType::Learning, 110, 120, 2),
            ]),
            at(0),
            true,
        );
        let (nodes, loose) = assemble_tree(&bands, Vec::new());
        assert!(loose.is_empty());
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0].children.is_empty());
        assert_eq!(nodes[1].children.len(), 1);
        assert_eq!(nodes[1].children[0].band.state_type, StateType::Learning);
    }

    #[test]
    fn orphan_nested_band_is_promoted() {
        let bands = assemble_bands(
            &spans(vec![
                closed(Scope::Primary, StateType::Progress, 0, 10, 0),
                closed(Scope::Nested(1), StateType::Learning, 50, 60, 1),
            ]),
            at(0),
            true,
        );
        let (nodes, _) = assemble_tree(&bands, Vec::new());
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].band.scope, Scope::Nested(1));
    }

    #[test]
    fn events_attach_to_deepest_containing_band() {
        let bands = assemble_bands(
            &spans(vec![
                closed(Scope::Primary, StateType::Progress, 0, 100, 0),
                closed(Scope::Nested(1), StateType::Learning, 10, 20, 1),
            ]),
            at(0),
            true,
        );
        let inside_child = TimelineEvent {
            offset: 15,
            event: Event::new(EventType::Note, 1, at(15)),
        };
        let inside_parent = TimelineEvent {
            offset: 50,
            event: Event::new(EventType::Note, 1, at(50)),
        };
        let outside = TimelineEvent {
            offset: 500,
            event: Event::new(EventType::Note, 1, at(500)),
        };
        let (nodes, loose) = assemble_tree(&bands, vec![inside_child, inside_parent, outside]);
        assert_eq!(nodes[0].events.len(), 1);
        assert_eq!(nodes[0].children[0].events.len(), 1);
        assert_eq!(loose.len(), 1);
    }

    #[test]
    fn summary_counts_primary_track_and_idle() {
        let bands = assemble_bands(
            &spans(vec![
                closed(Scope::Primary, StateType::Progress, 0, 100, 0),
                closed(Scope::Primary, StateType::Conflict, 100, 150, 1),
                closed(Scope::Nested(1), StateType::Learning, 110, 120, 2),
            ]),
            at(0),
            true,
        );
        let mut idle = Event::new(EventType::IdleActivity, 1, at(30));
        idle.duration_seconds = Some(20);
        let summary = summarize(&bands, &[idle], at(0), at(150));
        assert_eq!(summary.total_seconds, 150);
        assert_eq!(summary.by_type.get(&StateType::Progress), Some(&100));
        assert_eq!(summary.by_type.get(&StateType::Conflict), Some(&50));
        assert_eq!(summary.by_type.get(&StateType::Learning), None);
        assert_eq!(summary.idle_seconds, 20);
        assert_eq!(summary.event_counts.get(&EventType::IdleActivity), Some(&1));
    }
}
