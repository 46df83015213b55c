macro_rules! assert_read_write {
    (
        $type:ty : Read<$read_from:ty> + Write<$write_from:ty> {
            bytes_value(auto_endian) = $bytes_value:expr,
            rust_value = $rust_value:expr $(,)?
        }
    ) => {{
        // Big endian.
        {
            let bytes = $bytes_value.to_be_bytes();

            assert_eq!(
                <$type as crate::Read<$read_from>>::read::<crate::BigEndian, ()>(&bytes),
                Ok((&[] as &[u8], $rust_value)),
                "read as big endian"
            );

            let mut written_value = Vec::new();

            <$type as crate::Write<$write_from>>::write::<crate::BigEndian, _>(
                &$rust_value,
                &mut written_value,
            )
            .unwrap();

            assert_eq!(written_value, bytes, "write as big endian");
        }

        // Little endian.
        {
            let bytes = $bytes_value.to_le_bytes();

            assert_eq!(
                <$type as crate::Read<$read_from>>::read::<crate::LittleEndian, ()>(&bytes),
                Ok((&[] as &[u8], $rust_value)),
                "read as little endian"
            );

            let mut written_value = Vec::new();

            <$type as crate::Write<$write_from>>::write::<crate::LittleEndian, _>(
                &$rust_value,
                &mut written_value,
            )
            .unwrap();

            assert_eq!(written_value, bytes, "write as little endian");
        }
    }};

    (
        $type:ty : Read<$read_from:ty> + Write<$write_from:ty> {
            bytes(little_endian) = $bytes:expr,
            rust_value = $rust_value:expr $(,)?
        }
    ) => {{
        let bytes: &[u8] = $bytes;

        assert_eq!(
            <$type as crate::Read<$read_from>>::read::<crate::LittleEndian, ()>(bytes),
            Ok((&[] as &[u8], $rust_value)),
            "read as little endian"
        );

        let mut written_value = Vec::new();

        <$type as crate::Write<$write_from>>::write::<crate::LittleEndian, _>(
            &$rust_value,
            &mut written_value,
        )
        .unwrap();

        assert_eq!(written_value, bytes, "write as little endian");
    }};
}
