//! Кусочно-линейные огибающие усиления.

use serde::{Deserialize, Serialize};

/// Точка огибающей
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainPoint {
    /// Время на таймлайне (с)
    pub time: f64,
    /// Линейный коэффициент усиления
    pub gain: f64,
}

/// Огибающая усиления: линейная интерполяция между точками,
/// `outside_gain` до первой и после последней точки.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GainEnvelope {
    pub points: Vec<GainPoint>,
    pub outside_gain: f64,
}

impl GainEnvelope {
    pub fn constant(gain: f64) -> Self {
        Self {
            points: Vec::new(),
            outside_gain: gain,
        }
    }

    /// Приглушение фона под голосом `[start, end)`.
    ///
    /// Вокруг каждой границы усиление меняется линейно в пределах `±ramp`.
    /// Для голоса короче двух рамп рампы встречаются посередине.
    pub fn ducking(start: f64, end: f64, ramp: f64, ducked_gain: f64) -> Self {
        let point = |time, gain| GainPoint { time, gain };
        let points = if ramp <= 0.0 {
            vec![point(start, ducked_gain), point(end, ducked_gain)]
        } else if end - start >= 2.0 * ramp {
            vec![
                point(start - ramp, 1.0),
                point(start + ramp, ducked_gain),
                point(end - ramp, ducked_gain),
                point(end + ramp, 1.0),
            ]
        } else {
            let middle = (start + end) / 2.0;
            let depth = (middle - (start - ramp)) / (2.0 * ramp);
            vec![
                point(start - ramp, 1.0),
                point(middle, 1.0 - (1.0 - ducked_gain) * depth),
                point(end + ramp, 1.0),
            ]
        };
        Self {
            points,
            outside_gain: 1.0,
        }
    }

    /// Громкость голоса на `[start, end)` с линейным нарастанием `fade_in`
    /// и затуханием `fade_out`. Каждая рампа не длиннее половины голоса.
    pub fn voice(start: f64, end: f64, volume: f64, fade_in: f64, fade_out: f64) -> Self {
        let point = |time, gain| GainPoint { time, gain };
        let half = ((end - start) / 2.0).max(0.0);
        let fade_in = fade_in.clamp(0.0, half);
        let fade_out = fade_out.clamp(0.0, half);

        let mut points = Vec::with_capacity(4);
        if fade_in > 0.0 {
            points.push(point(start, 0.0));
            points.push(point(start + fade_in, volume));
        } else {
            points.push(point(start, volume));
        }
        if fade_out > 0.0 {
            points.push(point(end - fade_out, volume));
            points.push(point(end, 0.0));
        } else {
            points.push(point(end, volume));
        }
        Self {
            points,
            outside_gain: 0.0,
        }
    }

    /// Интервал времени, на котором огибающая отличается от `outside_gain`
    pub fn span(&self) -> Option<(f64, f64)> {
        Some((self.points.first()?.time, self.points.last()?.time))
    }

    /// Усиление в момент `time`
    pub fn gain_at(&self, time: f64) -> f64 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return self.outside_gain;
        };
        if time < first.time || time > last.time {
            return self.outside_gain;
        }

        for pair in self.points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if time <= b.time {
                let width = b.time - a.time;
                if width <= 0.0 {
                    return b.gain;
                }
                return a.gain + (b.gain - a.gain) * (time - a.time) / width;
            }
        }
        last.gain
    }
}
