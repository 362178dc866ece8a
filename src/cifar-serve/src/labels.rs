/// CIFAR-10 class names, index-aligned with the model's output vector.
pub const CLASS_NAMES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

pub const NUM_CLASSES: usize = CLASS_NAMES.len();

/// Class name for an output index, `None` when out of range.
pub fn class_name(index: usize) -> Option<&'static str> {
    CLASS_NAMES.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_order_is_fixed() {
        assert_eq!(NUM_CLASSES, 10);
        assert_eq!(class_name(0), Some("airplane"));
        assert_eq!(class_name(3), Some("cat"));
        assert_eq!(class_name(9), Some("truck"));
        assert_eq!(class_name(10), None);
    }
}
