use std::{collections::VecDeque, sync::Mutex};

use super::{Sensor, SensorError};
use crate::sync::lock;

/// An in-memory sensor that plays back a script of values and then keeps
/// repeating the last one.
#[derive(Debug)]
pub struct MemorySensor {
    name: String,
    state: Mutex<(VecDeque<f64>, Option<f64>)>,
}

impl MemorySensor {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new((values.into_iter().collect(), None)),
        }
    }

    pub fn constant(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, [value])
    }

    /// Queue more values behind the current script.
    pub fn push(&self, value: f64) {
        lock(&self.state).0.push_back(value);
    }
}

impl Sensor for MemorySensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn measure(&self) -> Result<f64, SensorError> {
        let mut state = lock(&self.state);
        let (queue, last) = &mut *state;

        if let Some(next) = queue.pop_front() {
            *last = Some(next);
        }
        last.ok_or_else(|| SensorError::Unavailable(self.name.clone()))
    }
}

/// A sensor computed by a closure.
pub struct FnSensor<F> {
    name: String,
    f: F,
}

impl<F> FnSensor<F>
where
    F: Fn() -> f64 + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Sensor for FnSensor<F>
where
    F: Fn() -> f64 + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn measure(&self) -> Result<f64, SensorError> {
        Ok((self.f)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_then_repeat_last() {
        let sensor = MemorySensor::new("scripted", [1.0, 2.0]);
        assert_eq!(sensor.measure().unwrap(), 1.0);
        assert_eq!(sensor.measure().unwrap(), 2.0);
        assert_eq!(sensor.measure().unwrap(), 2.0);

        sensor.push(5.0);
        assert_eq!(sensor.measure().unwrap(), 5.0);
    }

    #[test]
    fn test_empty_script_is_an_error() {
        let sensor = MemorySensor::new("empty", []);
        assert!(matches!(sensor.measure(), Err(SensorError::Unavailable(_))));
    }

    #[test]
    fn test_fn_sensor() {
        let sensor = FnSensor::new("answer", || 42.0);
        assert_eq!(sensor.measure().unwrap(), 42.0);
        assert_eq!(sensor.name(), "answer");
    }
}
