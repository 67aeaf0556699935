macro_rules! data_register {
    ($(#[$outer:meta])* pub $i:ident, $addr:expr, $name:expr) => {
        $(#[$outer])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        #[doc = concat!("`", $name, "` register.")]
        pub struct $i(pub u32);

        impl DebugRegister for $i {
            const ADDRESS: u8 = $addr;
            const NAME: &'static str = $name;
        }

        impl From<$i> for u32 {
            fn from(register: $i) -> Self {
                register.0
            }
        }

        impl From<u32> for $i {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

/// Implements [`DebugRegister`](super::communication_interface::DebugRegister)
/// and the `u32` conversions for a bitfield register.
macro_rules! debug_register {
    ($i:ident, $addr:expr, $name:expr) => {
        impl DebugRegister for $i {
            const ADDRESS: u8 = $addr;
            const NAME: &'static str = $name;
        }

        impl From<$i> for u32 {
            fn from(register: $i) -> Self {
                register.0
            }
        }

        impl From<u32> for $i {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}
